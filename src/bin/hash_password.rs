//! 生成 argon2 密码哈希，用于 config.toml 中的 `[[auth.users]]`
//!
//! 用法: `cargo run --bin hash_password`，从标准输入读取密码

use std::io::{self, Write};

fn main() -> anyhow::Result<()> {
    eprint!("Enter password: ");
    io::stderr().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    println!("{}", provencal_api::auth::hash_password(password)?);
    Ok(())
}
