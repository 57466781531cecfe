use serde::Deserialize;
use std::env;
use std::time::Duration;

/// 默认 JWT 密钥，生产环境禁止使用
pub const DEFAULT_SECRET_KEY: &str = "change-me";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub login_guard: LoginGuardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 加载过程中产生的告警（日志系统初始化之后再输出）
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            env: default_env(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_token_minutes")]
    pub access_token_expire_minutes: u64,
    /// 启动时预置的用户（密码为 argon2 PHC 哈希）
    #[serde(default)]
    pub users: Vec<User>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            access_token_expire_minutes: default_token_minutes(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
}

/// 登录防暴力破解配置
///
/// 所有时长单位为秒。取值为 0 表示关闭对应功能：
/// `max_attempts` 或 `lockout_seconds` 为 0 时不锁定，
/// `base_delay_seconds` 或 `max_delay_seconds` 为 0 时不退避。
#[derive(Debug, Clone, Deserialize)]
pub struct LoginGuardConfig {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lockout_seconds")]
    pub lockout_seconds: u64,
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: u64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
    /// 是否信任 X-Forwarded-For（只取第一跳）
    #[serde(default)]
    pub trust_x_forwarded_for: bool,
}

impl Default for LoginGuardConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_attempts: default_max_attempts(),
            lockout_seconds: default_lockout_seconds(),
            base_delay_seconds: default_base_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
            trust_x_forwarded_for: false,
        }
    }
}

impl LoginGuardConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_seconds)
    }

    /// 记录保留时长：窗口 + 锁定 + 60 秒，超过即视为过期
    pub fn retention(&self) -> Duration {
        Duration::from_secs(
            self.window_seconds
                .saturating_add(self.lockout_seconds)
                .saturating_add(60),
        )
    }

    pub fn lockout_enabled(&self) -> bool {
        self.max_attempts > 0 && self.lockout_seconds > 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_env() -> String {
    "development".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

fn default_token_minutes() -> u64 {
    30
}

fn default_window_seconds() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

fn default_lockout_seconds() -> u64 {
    900
}

fn default_base_delay_seconds() -> u64 {
    1
}

fn default_max_delay_seconds() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // 加载 .env 文件 (如果存在)
        let _ = dotenvy::dotenv();

        // config.toml 可选，缺省时全部使用默认值
        let mut config: Config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .build()?
            .try_deserialize()?;

        // 环境变量优先级高于配置文件
        config.apply_env(|name| env::var(name).ok());
        config.finalize()?;

        Ok(config)
    }

    /// 用环境变量覆盖配置项，`lookup` 便于测试时注入
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => self.warn(format!("PORT={} 无效，使用 {}", port, self.server.port)),
            }
        }
        if let Some(env) = get("ENV") {
            self.server.env = env.trim().to_lowercase();
        }
        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.server.allowed_origins = parse_origins(&origins);
        }

        if let Some(secret) = get("SECRET_KEY") {
            self.auth.secret_key = secret;
        }
        if let Some(v) = self.env_u64(get("ACCESS_TOKEN_EXPIRE_MINUTES"), "ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.auth.access_token_expire_minutes = v;
        }

        let guard = &mut self.login_guard;
        let mut pending = Vec::new();
        let mut num = |name: &str| parse_non_negative(name, get(name), &mut pending);
        if let Some(v) = num("LOGIN_WINDOW_SECONDS") {
            guard.window_seconds = v;
        }
        if let Some(v) = num("LOGIN_MAX_ATTEMPTS") {
            guard.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = num("LOGIN_LOCKOUT_SECONDS") {
            guard.lockout_seconds = v;
        }
        if let Some(v) = num("LOGIN_BASE_DELAY_SECONDS") {
            guard.base_delay_seconds = v;
        }
        if let Some(v) = num("LOGIN_MAX_DELAY_SECONDS") {
            guard.max_delay_seconds = v;
        }
        if let Some(raw) = get("LOGIN_TRUST_X_FORWARDED_FOR") {
            match parse_bool(&raw) {
                Some(v) => guard.trust_x_forwarded_for = v,
                None => pending.push(format!("LOGIN_TRUST_X_FORWARDED_FOR={} 无效，已忽略", raw)),
            }
        }
        self.warnings.extend(pending);

        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level.trim().to_lowercase();
        }
        if let Some(dir) = get("LOG_DIR") {
            self.logging.dir = dir;
        }
    }

    /// 校验并补全配置：生产环境必须设置 SECRET_KEY，且禁止 debug 日志
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        let production = self.is_production();

        if self.auth.secret_key.is_empty() {
            if production {
                anyhow::bail!("生产环境必须设置 SECRET_KEY");
            }
            self.auth.secret_key = DEFAULT_SECRET_KEY.to_string();
            self.warn("SECRET_KEY 未设置，使用开发默认值".to_string());
        }
        if production && self.auth.secret_key == DEFAULT_SECRET_KEY {
            anyhow::bail!("生产环境禁止使用默认 SECRET_KEY");
        }

        if self.auth.access_token_expire_minutes == 0 {
            anyhow::bail!("ACCESS_TOKEN_EXPIRE_MINUTES 必须大于 0");
        }

        if production && self.logging.level == "debug" {
            self.logging.level = "info".to_string();
            self.warn("生产环境不允许 debug 日志，已降为 info".to_string());
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(self.server.env.to_lowercase().as_str(), "prod" | "production")
    }

    pub fn token_ttl_seconds(&self) -> u64 {
        self.auth.access_token_expire_minutes.saturating_mul(60)
    }

    fn env_u64(&mut self, raw: Option<String>, name: &str) -> Option<u64> {
        let mut pending = Vec::new();
        let v = parse_non_negative(name, raw, &mut pending);
        self.warnings.extend(pending);
        v
    }

    fn warn(&mut self, msg: String) {
        self.warnings.push(msg);
    }
}

/// 逗号分隔的来源列表: "http://localhost:3000,http://127.0.0.1:3000"
pub fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 解析整数环境变量：非法值保留默认，负数按 0 处理
fn parse_non_negative(name: &str, raw: Option<String>, warnings: &mut Vec<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<i64>() {
        Ok(v) if v < 0 => {
            warnings.push(format!("{}={} 为负数，按 0 处理（关闭对应功能）", name, v));
            Some(0)
        }
        Ok(v) => Some(v as u64),
        Err(_) => {
            warnings.push(format!("{}={} 不是整数，使用默认值", name, raw));
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
