use anyhow::{bail, Result};
use clap::Parser;
use netops_core::passwords::{
    fit_format, generate_passwords, parse_format, DigitSet, PasswordOptions, PasswordPolicy,
    DEFAULT_LENGTH, DEFAULT_SYMBOLS,
};
use std::path::{Path, PathBuf};

use crate::ui::{key_value_table, print_success};

#[derive(Parser, Debug)]
#[command(
    about = "Generate random passwords",
    after_help = r#"Examples:
  netops pw-gen
  netops pw-gen --format ulnnnnns --count 10
  netops pw-gen --format "u,l,n" --length 12
  netops pw-gen --length 20 --no-symbols --digits 1-9 --count 50 --output passwords.csv
"#
)]
pub struct PwGenArgs {
    /// 逐位格式：u 大写、l 小写、n 数字、s 符号；同时给出 --length 时循环补齐或截断
    #[arg(short, long, value_name = "TOKENS")]
    pub format: Option<String>,

    /// 密码长度（策略模式默认 8）
    #[arg(short, long, value_name = "N")]
    pub length: Option<usize>,

    /// 不使用大写字母
    #[arg(long)]
    pub no_upper: bool,

    /// 不使用小写字母
    #[arg(long)]
    pub no_lower: bool,

    /// 不使用数字
    #[arg(long)]
    pub no_digits: bool,

    /// 不使用符号
    #[arg(long)]
    pub no_symbols: bool,

    /// 符号字符集
    #[arg(long, default_value = DEFAULT_SYMBOLS)]
    pub symbols: String,

    /// 数字字符集：0-9 或 1-9
    #[arg(long, value_name = "SET", default_value = "0-9")]
    pub digits: DigitSet,

    /// 生成数量
    #[arg(short = 'n', long, visible_alias = "amount", default_value_t = 1)]
    pub count: usize,

    /// 写入文件（.csv 带表头，其他扩展名每行一个）
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl PwGenArgs {
    pub fn options(&self) -> Result<PasswordOptions> {
        if self.length == Some(0) {
            bail!("--length must be greater than 0");
        }
        let policy = PasswordPolicy {
            length: self.length.unwrap_or(DEFAULT_LENGTH),
            upper: !self.no_upper,
            lower: !self.no_lower,
            digits: !self.no_digits,
            symbols: !self.no_symbols,
            symbol_set: self.symbols.clone(),
            digit_set: self.digits,
        };
        let format = match &self.format {
            Some(raw) => Some(fit_format(&parse_format(raw)?, self.length)?),
            None => None,
        };
        Ok(PasswordOptions { policy, format })
    }
}

fn write_passwords(path: &Path, passwords: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let mut body = String::new();
    if is_csv {
        body.push_str("password\n");
    }
    for pw in passwords {
        body.push_str(pw);
        body.push('\n');
    }
    std::fs::write(path, body)?;
    Ok(())
}

pub fn run_pw_gen(args: PwGenArgs) -> Result<()> {
    if args.count == 0 {
        bail!("--count must be greater than 0");
    }
    let options = args.options()?;
    let passwords = generate_passwords(&options, args.count)?;

    match &args.output {
        Some(path) => {
            write_passwords(path, &passwords)?;
            print_success(&format!("Wrote {} password(s) to {}", passwords.len(), path.display()));
        }
        None if passwords.len() == 1 => println!("{}", passwords[0]),
        None => {
            let rows: Vec<(String, String)> = passwords
                .into_iter()
                .enumerate()
                .map(|(i, pw)| ((i + 1).to_string(), pw))
                .collect();
            println!("{}", key_value_table(["#", "PASSWORD"], &rows));
        }
    }
    Ok(())
}
