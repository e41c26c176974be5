//! ACME HTTP-01 验证应答。
//!
//! 令牌与密钥来自环境变量，每次请求时读取，因此续期证书无需重启服务：
//!
//! - `ACME_TOKEN` / `ACME_KEY`
//! - `ACME_TOKEN_<N>` / `ACME_KEY_<N>`，用于同时验证多个域名

use std::collections::HashMap;

const TOKEN_VAR: &str = "ACME_TOKEN";
const KEY_VAR: &str = "ACME_KEY";

/// 在 `vars` 中查找与 `token` 匹配的密钥授权。
pub fn find_key<I>(token: &str, vars: I) -> Option<String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: HashMap<String, String> = vars
        .into_iter()
        .filter(|(k, _)| k.starts_with(TOKEN_VAR) || k.starts_with(KEY_VAR))
        .collect();

    if vars.get(TOKEN_VAR).map(String::as_str) == Some(token) {
        return vars.get(KEY_VAR).cloned();
    }

    let prefix = format!("{}_", TOKEN_VAR);
    let mut suffixes: Vec<&str> = vars
        .iter()
        .filter(|(_, v)| v.as_str() == token)
        .filter_map(|(k, _)| k.strip_prefix(&prefix))
        .collect();
    // 多个变量值相同时结果应当稳定
    suffixes.sort_unstable();
    suffixes
        .into_iter()
        .find_map(|n| vars.get(&format!("{}_{}", KEY_VAR, n)).cloned())
}

/// 从进程环境中查找。
pub fn find_key_in_env(token: &str) -> Option<String> {
    find_key(token, std::env::vars())
}
