//! 命令行参数解析

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use courier_core::config::LogFormat;
use courier_core::{Message, MessageMetadata};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Send {
        destination: String,
        payload: Value,
        priority: Option<u8>,
        correlation_id: Option<String>,
    },
    SendBatch {
        destination: String,
        file: PathBuf,
    },
    CheckConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub command: CliCommand,
}

pub fn command() -> Command {
    Command::new("courier")
        .version(env!("CARGO_PKG_VERSION"))
        .about("弹性消息分发系统")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"])
                .global(true),
        )
        .subcommand(
            Command::new("send")
                .about("发送单条消息")
                .arg(destination_arg())
                .arg(
                    Arg::new("payload")
                        .short('p')
                        .long("payload")
                        .value_name("JSON")
                        .help("消息负载（JSON）")
                        .required(true),
                )
                .arg(
                    Arg::new("priority")
                        .long("priority")
                        .value_name("N")
                        .help("消息优先级 0-10")
                        .value_parser(clap::value_parser!(u8)),
                )
                .arg(
                    Arg::new("correlation-id")
                        .long("correlation-id")
                        .value_name("ID")
                        .help("关联ID"),
                ),
        )
        .subcommand(
            Command::new("send-batch")
                .about("从文件批量发送消息")
                .arg(destination_arg())
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .help("包含负载数组的JSON文件")
                        .value_parser(clap::value_parser!(PathBuf))
                        .required(true),
                ),
        )
        .subcommand(Command::new("check-config").about("验证并输出生效的配置"))
}

fn destination_arg() -> Arg {
    Arg::new("destination")
        .short('d')
        .long("destination")
        .value_name("DEST")
        .help("目标地址（HTTP路径或队列名）")
        .required(true)
}

pub fn parse_args<I, T>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    from_matches(&matches)
}

fn from_matches(matches: &ArgMatches) -> Result<CliArgs> {
    let log_format = matches
        .get_one::<String>("log-format")
        .map(|format| LogFormat::parse(format))
        .transpose()?;

    let command = match matches.subcommand() {
        Some(("send", sub)) => {
            let raw = required(sub, "payload")?;
            let payload = serde_json::from_str(&raw)
                .with_context(|| format!("消息负载不是合法的JSON: {raw}"))?;
            CliCommand::Send {
                destination: required(sub, "destination")?,
                payload,
                priority: sub.get_one::<u8>("priority").copied(),
                correlation_id: sub.get_one::<String>("correlation-id").cloned(),
            }
        }
        Some(("send-batch", sub)) => CliCommand::SendBatch {
            destination: required(sub, "destination")?,
            file: sub
                .get_one::<PathBuf>("file")
                .cloned()
                .context("缺少参数: file")?,
        },
        Some(("check-config", _)) => CliCommand::CheckConfig,
        Some((other, _)) => return Err(anyhow::anyhow!("不支持的命令: {other}")),
        None => return Err(anyhow::anyhow!("缺少子命令")),
    };

    Ok(CliArgs {
        config: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format,
        command,
    })
}

fn required(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("缺少参数: {name}"))
}

pub fn build_message(payload: Value, priority: Option<u8>, correlation_id: Option<String>) -> Message {
    let message = Message::from_value(payload);
    if priority.is_none() && correlation_id.is_none() {
        return message;
    }
    message.with_metadata(MessageMetadata {
        priority,
        correlation_id,
        ..Default::default()
    })
}

/// 读取批量文件，文件内容为负载数组
pub fn load_batch(path: &Path) -> Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取批量文件失败: {}", path.display()))?;
    let payloads: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("批量文件必须是JSON数组: {}", path.display()))?;
    Ok(payloads.into_iter().map(Message::from_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_send() {
        let args = parse_args([
            "courier",
            "--log-format",
            "json",
            "send",
            "-d",
            "orders",
            "--payload",
            r#"{"orderId": 7}"#,
            "--priority",
            "5",
        ])
        .unwrap();

        assert_eq!(args.log_format, Some(LogFormat::Json));
        assert_eq!(
            args.command,
            CliCommand::Send {
                destination: "orders".to_string(),
                payload: json!({"orderId": 7}),
                priority: Some(5),
                correlation_id: None,
            }
        );
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let args = parse_args(["courier", "check-config", "--config", "courier.toml"]).unwrap();
        assert_eq!(args.config.as_deref(), Some("courier.toml"));
        assert_eq!(args.command, CliCommand::CheckConfig);
    }

    #[test]
    fn test_invalid_payload_rejected() {
        assert!(parse_args(["courier", "send", "-d", "orders", "-p", "{oops"]).is_err());
        assert!(parse_args(["courier"]).is_err());
    }

    #[test]
    fn test_build_message_metadata() {
        let message = build_message(json!({"a": 1}), None, None);
        assert!(message.metadata.is_none());

        let message = build_message(json!({"a": 1}), Some(3), Some("corr".to_string()));
        assert_eq!(message.priority(), Some(3));
        assert_eq!(message.correlation_id(), Some("corr"));
    }

    #[test]
    fn test_load_batch() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"n": 1}}, {{"n": 2}}, 3]"#).unwrap();

        let messages = load_batch(file.path()).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].payload["n"], json!(2));
        assert_eq!(messages[2].payload["value"], json!(3));
    }
}
