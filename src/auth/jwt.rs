use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// JWT 使用的算法（明确指定，避免依赖默认值）
const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // username
    pub exp: usize,       // 过期时间 (Unix timestamp)
}

/// 签发结果
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

/// 令牌签发/校验接口，登录流程只依赖这个抽象
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, subject: &str) -> anyhow::Result<IssuedToken>;
    fn validate(&self, token: &str) -> anyhow::Result<Claims>;
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl JwtService {
    pub fn new(secret: &str, ttl_seconds: u64) -> anyhow::Result<Self> {
        let ttl_i64 = i64::try_from(ttl_seconds)
            .map_err(|_| anyhow::anyhow!("TTL时间溢出：超过i64最大值"))?;

        if ttl_i64 <= 0 {
            anyhow::bail!("TTL时间必须大于0");
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds: ttl_i64,
        })
    }

    /// 获取 token 有效期（秒）
    pub fn get_ttl_seconds(&self) -> u64 {
        self.ttl_seconds as u64
    }
}

impl TokenIssuer for JwtService {
    fn issue(&self, subject: &str) -> anyhow::Result<IssuedToken> {
        let expiration = Utc::now()
            .checked_add_signed(Duration::seconds(self.ttl_seconds))
            .ok_or_else(|| anyhow::anyhow!("时间计算溢出"))?
            .timestamp();

        let exp = usize::try_from(expiration)
            .map_err(|_| anyhow::anyhow!("过期时间转换失败"))?;

        let claims = Claims {
            sub: subject.to_string(),
            exp,
        };

        let token = encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)?;

        Ok(IssuedToken {
            token,
            expires_in: self.get_ttl_seconds(),
        })
    }

    fn validate(&self, token: &str) -> anyhow::Result<Claims> {
        // 默认会验证 exp（过期时间）
        let validation = Validation::new(JWT_ALGORITHM);
        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims)
    }
}
