//! 设备密码生成
//!
//! 两种模式：
//! - 格式模式：`u`/`l`/`n`/`s` 逐位指定每个字符的类别，其他字符（逗号、空格）忽略；
//! - 策略模式：给定长度与启用的字符类，每类至少一个字符，其余从并集中抽取后打乱。

use rand::seq::SliceRandom;
use rand::Rng;
use std::str::FromStr;

use crate::error::{NetopsError, Result};

pub const DEFAULT_LENGTH: usize = 8;
pub const DEFAULT_SYMBOLS: &str = "@#$%&*+-=?^~";

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
pub const DIGITS_0_9: &str = "0123456789";
pub const DIGITS_1_9: &str = "123456789";

/// 数字字符集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigitSet {
    #[default]
    ZeroToNine,
    OneToNine,
}

impl DigitSet {
    pub fn chars(self) -> &'static str {
        match self {
            DigitSet::ZeroToNine => DIGITS_0_9,
            DigitSet::OneToNine => DIGITS_1_9,
        }
    }
}

impl FromStr for DigitSet {
    type Err = NetopsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "0-9" => Ok(DigitSet::ZeroToNine),
            "1-9" => Ok(DigitSet::OneToNine),
            other => Err(NetopsError::config_error(format!(
                "unknown digit set '{}' (expected 0-9 or 1-9)",
                other
            ))),
        }
    }
}

/// 格式模式中的一位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Upper,
    Lower,
    Digit,
    Symbol,
}

/// 解析 `ulnnnnns` 或 `u,l,n,n,n,n,n,s`
pub fn parse_format(format: &str) -> Result<Vec<Token>> {
    let tokens: Vec<Token> = format
        .chars()
        .filter_map(|c| match c.to_ascii_lowercase() {
            'u' => Some(Token::Upper),
            'l' => Some(Token::Lower),
            'n' => Some(Token::Digit),
            's' => Some(Token::Symbol),
            _ => None,
        })
        .collect();
    if tokens.is_empty() {
        return Err(NetopsError::config_error(format!(
            "password format '{}' contains no valid tokens (u/l/n/s)",
            format
        )));
    }
    Ok(tokens)
}

/// 给定长度时把格式循环重复后截断到该长度
pub fn fit_format(tokens: &[Token], length: Option<usize>) -> Result<Vec<Token>> {
    match length {
        None => Ok(tokens.to_vec()),
        Some(0) => Err(NetopsError::config_error("password length must be greater than 0")),
        Some(n) => Ok(tokens.iter().copied().cycle().take(n).collect()),
    }
}

/// 策略模式的参数；字符集也用于格式模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub length: usize,
    pub upper: bool,
    pub lower: bool,
    pub digits: bool,
    pub symbols: bool,
    pub symbol_set: String,
    pub digit_set: DigitSet,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            upper: true,
            lower: true,
            digits: true,
            symbols: true,
            symbol_set: DEFAULT_SYMBOLS.to_string(),
            digit_set: DigitSet::default(),
        }
    }
}

impl PasswordPolicy {
    fn pool(&self, token: Token) -> Result<Vec<char>> {
        let pool: Vec<char> = match token {
            Token::Upper => UPPER.chars().collect(),
            Token::Lower => LOWER.chars().collect(),
            Token::Digit => self.digit_set.chars().chars().collect(),
            Token::Symbol => self.symbol_set.chars().collect(),
        };
        if pool.is_empty() {
            return Err(NetopsError::config_error("symbol set is empty"));
        }
        Ok(pool)
    }

    /// 启用的字符类，固定顺序：大写、小写、数字、符号
    pub fn enabled(&self) -> Result<Vec<Token>> {
        let enabled: Vec<Token> = [
            (self.upper, Token::Upper),
            (self.lower, Token::Lower),
            (self.digits, Token::Digit),
            (self.symbols, Token::Symbol),
        ]
        .into_iter()
        .filter_map(|(on, token)| on.then_some(token))
        .collect();
        if enabled.is_empty() {
            return Err(NetopsError::config_error("password policy enables no character classes"));
        }
        Ok(enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PasswordOptions {
    pub policy: PasswordPolicy,
    /// 设置后按位生成，忽略策略中的长度与开关
    pub format: Option<Vec<Token>>,
}

fn pick<R: Rng + ?Sized>(pool: &[char], rng: &mut R) -> Result<char> {
    pool.choose(rng)
        .copied()
        .ok_or_else(|| NetopsError::internal("empty character pool"))
}

pub fn generate_password_with<R: Rng + ?Sized>(options: &PasswordOptions, rng: &mut R) -> Result<String> {
    let policy = &options.policy;
    if let Some(tokens) = &options.format {
        return tokens
            .iter()
            .map(|&t| pick(&policy.pool(t)?, rng))
            .collect();
    }

    let enabled = policy.enabled()?;
    if policy.length < enabled.len() {
        return Err(NetopsError::config_error(format!(
            "password length {} is shorter than the {} required character classes",
            policy.length,
            enabled.len()
        )));
    }
    let pools = enabled
        .iter()
        .map(|&t| policy.pool(t))
        .collect::<Result<Vec<_>>>()?;

    let mut chars = pools
        .iter()
        .map(|pool| pick(pool, rng))
        .collect::<Result<Vec<char>>>()?;
    let all: Vec<char> = pools.concat();
    while chars.len() < policy.length {
        chars.push(pick(&all, rng)?);
    }
    chars.shuffle(rng);
    Ok(chars.into_iter().collect())
}

pub fn generate_password(options: &PasswordOptions) -> Result<String> {
    generate_password_with(options, &mut rand::thread_rng())
}

pub fn generate_passwords(options: &PasswordOptions, count: usize) -> Result<Vec<String>> {
    (0..count).map(|_| generate_password(options)).collect()
}
