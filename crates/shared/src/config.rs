//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

pub use config::ConfigError;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "DECISION";

/// 从配置文件和环境变量加载配置
///
/// 配置目录取 `CONFIG_DIR`，默认为 `config`。
/// 加载顺序（后加载的会覆盖先加载的同名配置项）：
/// 1. config/default.toml（默认配置）
/// 2. config/{environment}.toml（环境特定配置，环境取 `DECISION_ENV`，默认 development）
/// 3. config/{service_name}.toml（服务特定配置）
/// 4. 环境变量（DECISION__ 前缀，如 DECISION__ENGINE__WORKERS -> engine.workers）
pub fn load<T: DeserializeOwned>(service_name: &str) -> Result<T, ConfigError> {
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let env = std::env::var("DECISION_ENV").unwrap_or_else(|_| "development".to_string());
    load_from(Path::new(&config_dir), &env, service_name)
}

/// 从指定目录和环境加载配置
pub fn load_from<T: DeserializeOwned>(
    config_dir: &Path,
    env: &str,
    service_name: &str,
) -> Result<T, ConfigError> {
    Config::builder()
        .set_default("service_name", service_name)?
        .set_default("environment", env)?
        .set_default("observability.service_name", service_name)?
        // 加载默认配置文件
        .add_source(File::from(config_dir.join("default.toml")).required(false))
        // 加载环境特定配置
        .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
        // 加载服务特定配置
        .add_source(
            File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
        )
        // 环境变量覆盖（DECISION__ENGINE__WORKERS -> engine.workers）
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
