use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub database_file: PathBuf,
    pub log_dir: PathBuf,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 4 {
            return Err(
                "usage: urdragon <cert-file> <key-file> <database-file> [bind_addr] [log_dir]"
                    .to_string(),
            );
        }

        let cert_file = Path::new(&args[1]).to_path_buf();
        let key_file = Path::new(&args[2]).to_path_buf();
        let database_file = Path::new(&args[3]).to_path_buf();
        let bind_addr = if args.len() > 4 {
            args[4].clone()
        } else {
            std::env::var("URDRAGON_BIND_ADDR")
                .ok()
                .and_then(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .unwrap_or_else(|| "0.0.0.0:12501".to_string())
        };
        let log_dir = if args.len() > 5 {
            Path::new(&args[5]).to_path_buf()
        } else {
            std::env::var("URDRAGON_LOG_DIR")
                .ok()
                .and_then(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(Path::new(trimmed).to_path_buf())
                    }
                })
                .unwrap_or_else(|| derive_log_dir(&database_file))
        };

        Ok(Self {
            bind_addr,
            cert_file,
            key_file,
            database_file,
            log_dir,
        })
    }
}

fn derive_log_dir(database_file: &Path) -> PathBuf {
    database_file
        .parent()
        .map(|parent| parent.join("log"))
        .unwrap_or_else(|| PathBuf::from("log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn requires_cert_key_and_database() {
        assert!(AppConfig::from_args(&args(&["urdragon"])).is_err());
        assert!(AppConfig::from_args(&args(&["urdragon", "a.crt", "a.key"])).is_err());
    }

    #[test]
    fn positional_arguments_win() {
        let config = AppConfig::from_args(&args(&[
            "urdragon",
            "a.crt",
            "a.key",
            "data/server.db",
            "127.0.0.1:9000",
            "/var/log/urdragon",
        ]))
        .expect("config");
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.log_dir, PathBuf::from("/var/log/urdragon"));
    }

    #[test]
    fn log_dir_defaults_next_to_the_database() {
        let config =
            AppConfig::from_args(&args(&["urdragon", "a.crt", "a.key", "data/server.db"]))
                .expect("config");
        assert_eq!(config.log_dir, PathBuf::from("data/log"));
    }
}
