use crate::config::DatabaseConfig;

/// Build a connection string tagged with the calling service.
///
/// Values are interpolated as given; callers own any escaping their
/// credentials need.
pub fn build_dsn(
    driver: &str,
    username: &str,
    password: &str,
    host: &str,
    port: &str,
    db_name: &str,
    service_name: &str,
) -> String {
    format!(
        "{}://{}:{}@{}:{}/{}?application_name={}",
        driver, username, password, host, port, db_name, service_name
    )
}

/// DSN for `host` using the rest of `config`.
pub fn dsn_for_host(config: &DatabaseConfig, host: &str, service_name: &str) -> String {
    build_dsn(
        &config.driver,
        &config.credentials.username,
        &config.credentials.password,
        host,
        &config.port,
        &config.db_name,
        service_name,
    )
}

/// Mask the password for safe logging.
pub fn mask_dsn(dsn: &str) -> String {
    if let Some(at_pos) = dsn.rfind('@') {
        let scheme_end = dsn.find("://").map(|i| i + 3).unwrap_or(0);
        if let Some(colon_pos) = dsn[scheme_end..at_pos].find(':') {
            let prefix = &dsn[..scheme_end + colon_pos + 1];
            let suffix = &dsn[at_pos..];
            return format!("{}***{}", prefix, suffix);
        }
    }
    dsn.to_string()
}
