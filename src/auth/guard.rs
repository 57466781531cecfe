//! 登录防暴力破解
//!
//! 按客户端地址和用户名两个维度分别记录连续失败次数：
//! 失败后按指数退避延长等待，窗口内失败次数达到上限则硬锁定。
//! 任一维度处于封禁期，本次登录即被拒绝，返回两者中较长的等待时间。
//!
//! 状态只存在于当前进程内存中，多进程部署时各自独立计数。

use crate::config::LoginGuardConfig;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 封禁时长上限，防止配置值过大导致 Instant 溢出
const MAX_BLOCK: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// 记录键：地址和用户名是两个独立的空间
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttemptKey {
    Address(IpAddr),
    Username(String),
    /// 空用户名统一归到这里，不带凭据的探测也会被整体限流
    EmptyUsername,
}

impl AttemptKey {
    /// 用户名规范化：去掉首尾空白并转小写
    pub fn username(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            AttemptKey::EmptyUsername
        } else {
            AttemptKey::Username(normalized)
        }
    }

    fn pair(address: IpAddr, username: &str) -> [AttemptKey; 2] {
        [AttemptKey::Address(address), AttemptKey::username(username)]
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptKey::Address(ip) => write!(f, "ip:{}", ip),
            AttemptKey::Username(name) => write!(f, "user:{}", name),
            AttemptKey::EmptyUsername => write!(f, "user:<empty>"),
        }
    }
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    fail_count: u32,
    window_start: Instant,
    blocked_until: Instant,
    last_seen: Instant,
}

impl AttemptRecord {
    fn new(now: Instant) -> Self {
        Self {
            fail_count: 0,
            window_start: now,
            blocked_until: now,
            last_seen: now,
        }
    }

    // 新的失败周期；仍在生效的封禁不缩短
    fn restart(&mut self, now: Instant) {
        self.fail_count = 0;
        self.window_start = now;
        self.blocked_until = self.blocked_until.max(now);
    }
}

/// 登录前检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// 需要等待的秒数（向上取整），允许时为 0
    pub wait_seconds: u64,
}

impl Decision {
    fn from_wait(wait: Duration) -> Self {
        let wait_seconds = ceil_secs(wait);
        Self {
            allowed: wait_seconds == 0,
            wait_seconds,
        }
    }
}

/// 记录一次失败后的状态，用于日志和指标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// 两个维度中较大的连续失败次数
    pub fail_count: u32,
    /// 下一次尝试前需要等待的秒数
    pub wait_seconds: u64,
    /// 是否触发了硬锁定
    pub locked: bool,
}

/// 过期索引：按记录最早可清理的时间排序
///
/// 每次失败都会追加一条；记录之后被更新时旧条目保留，
/// 弹出时再用 `is_expired` 复核，所以旧条目只会被跳过。
#[derive(Default)]
struct ExpiryIndex {
    entries: BTreeMap<(Instant, u64), AttemptKey>,
    seq: u64,
}

impl ExpiryIndex {
    fn push(&mut self, expires_at: Instant, key: AttemptKey) {
        self.seq = self.seq.wrapping_add(1);
        self.entries.insert((expires_at, self.seq), key);
    }

    // 取出所有在 now 之前到期的条目
    fn pop_due(&mut self, now: Instant) -> Vec<AttemptKey> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 >= now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }
}

pub struct LoginGuard {
    records: DashMap<AttemptKey, AttemptRecord>,
    cfg: LoginGuardConfig,
    expiry: Mutex<ExpiryIndex>,
}

impl LoginGuard {
    pub fn new(cfg: LoginGuardConfig) -> Self {
        Self {
            records: DashMap::new(),
            cfg,
            expiry: Mutex::new(ExpiryIndex::default()),
        }
    }

    pub fn config(&self) -> &LoginGuardConfig {
        &self.cfg
    }

    /// 当前跟踪的键数量
    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }

    pub fn check_allowed(&self, address: IpAddr, username: &str) -> Decision {
        self.check_allowed_at(address, username, Instant::now())
    }

    /// 检查是否允许本次登录，不修改计数
    pub fn check_allowed_at(&self, address: IpAddr, username: &str, now: Instant) -> Decision {
        self.purge(now);

        let wait = AttemptKey::pair(address, username)
            .iter()
            .map(|key| self.remaining_block(key, now))
            .max()
            .unwrap_or(Duration::ZERO);

        Decision::from_wait(wait)
    }

    pub fn record_failure(&self, address: IpAddr, username: &str) -> FailureOutcome {
        self.record_failure_at(address, username, Instant::now())
    }

    /// 记录一次失败：两个维度都累加并计算退避/锁定
    pub fn record_failure_at(&self, address: IpAddr, username: &str, now: Instant) -> FailureOutcome {
        self.purge(now);

        let mut outcome = FailureOutcome {
            fail_count: 0,
            wait_seconds: 0,
            locked: false,
        };

        let mut touched = Vec::with_capacity(2);
        for key in AttemptKey::pair(address, username) {
            let mut entry = self
                .records
                .entry(key.clone())
                .or_insert_with(|| AttemptRecord::new(now));
            let record = entry.value_mut();

            if self.is_expired(record, now)
                || now.saturating_duration_since(record.window_start) > self.cfg.window()
            {
                record.restart(now);
            }

            record.fail_count = record.fail_count.saturating_add(1);

            let delay = self.backoff_delay(record.fail_count);
            record.blocked_until = record.blocked_until.max(deadline(now, delay));

            let locked = self.cfg.lockout_enabled() && record.fail_count >= self.cfg.max_attempts;
            if locked {
                record.blocked_until = record.blocked_until.max(deadline(now, self.cfg.lockout()));
                tracing::warn!(
                    key = %key,
                    fail_count = record.fail_count,
                    lockout_seconds = self.cfg.lockout_seconds,
                    "登录失败次数达到上限，已锁定"
                );
            }

            record.last_seen = now;

            outcome.fail_count = outcome.fail_count.max(record.fail_count);
            outcome.wait_seconds = outcome
                .wait_seconds
                .max(ceil_secs(record.blocked_until.saturating_duration_since(now)));
            outcome.locked |= locked;

            let expires_at = deadline(now, self.cfg.retention()).max(record.blocked_until);
            drop(entry);
            touched.push((expires_at, key));
        }

        // 先释放 map 分片锁再登记索引，与 purge 的加锁顺序一致
        let mut expiry = self.expiry.lock().unwrap_or_else(|e| e.into_inner());
        for (expires_at, key) in touched {
            expiry.push(expires_at, key);
        }

        outcome
    }

    pub fn record_success(&self, address: IpAddr, username: &str) {
        self.record_success_at(address, username, Instant::now())
    }

    /// 登录成功：无条件清除两个维度的记录
    pub fn record_success_at(&self, address: IpAddr, username: &str, now: Instant) {
        for key in AttemptKey::pair(address, username) {
            if self.records.remove(&key).is_some() {
                tracing::debug!(key = %key, "登录成功，清除失败记录");
            }
        }
        self.purge(now);
    }

    /// 删除所有过期记录，返回删除数量
    ///
    /// 只处理过期索引中已经到期的条目，开销与到期条目数成正比。
    pub fn purge(&self, now: Instant) -> usize {
        let due = self
            .expiry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_due(now);

        let purged = due
            .iter()
            .filter(|key| {
                self.records
                    .remove_if(*key, |_, record| self.is_expired(record, now))
                    .is_some()
            })
            .count();

        if purged > 0 {
            tracing::debug!(purged, remaining = self.records.len(), "清理过期登录记录");
        }
        purged
    }

    fn remaining_block(&self, key: &AttemptKey, now: Instant) -> Duration {
        if self
            .records
            .remove_if(key, |_, record| self.is_expired(record, now))
            .is_some()
        {
            return Duration::ZERO;
        }

        self.records
            .get(key)
            .map(|record| record.blocked_until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    // 过期：超过保留期未见且不在封禁中
    fn is_expired(&self, record: &AttemptRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.last_seen) > self.cfg.retention()
            && record.blocked_until <= now
    }

    /// 第 n 次失败的退避时长：base * 2^(n-1)，不超过 max
    fn backoff_delay(&self, fail_count: u32) -> Duration {
        let base = self.cfg.base_delay_seconds;
        let max = self.cfg.max_delay_seconds;
        if base == 0 || max == 0 || fail_count == 0 {
            return Duration::ZERO;
        }

        let factor = 1u64.checked_shl(fail_count - 1).unwrap_or(u64::MAX);
        Duration::from_secs(base.saturating_mul(factor).min(max))
    }
}

fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(MAX_BLOCK)).unwrap_or(now)
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
