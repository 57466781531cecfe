use crate::config::User;
use crate::error::AppError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 凭据校验接口：登录流程不关心密码如何存储和比对
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> Result<bool, AppError>;
}

/// 用户存储 - 内存中的用户名到 argon2 哈希的映射
#[derive(Clone)]
pub struct UserStore {
    users: Arc<RwLock<HashMap<String, String>>>,
    /// 用户不存在时也做一次哈希比对，避免通过耗时判断用户是否存在
    dummy_hash: Arc<str>,
}

impl UserStore {
    /// 用配置中的预置用户创建存储，哈希格式不合法时直接报错
    pub fn new(initial_users: Vec<User>) -> anyhow::Result<Self> {
        let mut users = HashMap::with_capacity(initial_users.len());
        for user in initial_users {
            PasswordHash::new(&user.password_hash).map_err(|e| {
                anyhow::anyhow!("用户 {} 的 password_hash 无效: {}", user.username, e)
            })?;
            users.insert(user.username.trim().to_string(), user.password_hash);
        }

        let dummy_hash = hash_password("dummy-password-for-unknown-users")?;

        Ok(Self {
            users: Arc::new(RwLock::new(users)),
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    /// 注册新用户，返回规范化后的用户名
    pub async fn register(&self, username: &str, password: &str) -> Result<String, AppError> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(AppError::BadRequest("用户名不能为空".to_string()));
        }
        if password.is_empty() {
            return Err(AppError::BadRequest("密码不能为空".to_string()));
        }
        if self.contains(&username).await {
            return Err(AppError::Conflict(format!("用户名 {} 已被占用", username)));
        }

        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

        // 哈希期间可能有并发注册，写锁下再确认一次
        let mut users = self.users.write().await;
        if users.contains_key(&username) {
            return Err(AppError::Conflict(format!("用户名 {} 已被占用", username)));
        }
        users.insert(username.clone(), hash);
        tracing::info!(username = %username, "新用户注册成功");

        Ok(username)
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username.trim())
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl CredentialVerifier for UserStore {
    async fn verify(&self, username: &str, password: &str) -> Result<bool, AppError> {
        let stored = self.users.read().await.get(username.trim()).cloned();
        let known = stored.is_some();
        let hash = stored.unwrap_or_else(|| self.dummy_hash.to_string());

        let password = password.to_string();
        let matched = tokio::task::spawn_blocking(move || verify_password(&hash, &password)).await??;

        Ok(known && matched)
    }
}

pub fn verify_password(hash: &str, password: &str) -> anyhow::Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid password hash: {e}"))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}
