use anyhow::{Context, Result};
use courier::cli::{self, CliArgs, CliCommand};
use courier::Application;
use courier_core::AppConfig;
use courier_infrastructure::{init_logging, install_prometheus_exporter};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args(std::env::args_os()).unwrap_or_else(|e| {
        match e.downcast_ref::<clap::Error>() {
            Some(clap_error) => clap_error.exit(),
            None => {
                eprintln!("{e:#}");
                std::process::exit(2);
            }
        }
    });

    let mut config = AppConfig::load(args.config.as_deref()).with_context(|| {
        format!("加载配置失败: {}", args.config.as_deref().unwrap_or("默认路径"))
    })?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    if args.command == CliCommand::CheckConfig {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.logging)?;
    info!("启动消息分发系统");

    if config.monitoring.enabled {
        if let Some(listen) = &config.monitoring.prometheus_listen {
            install_prometheus_exporter(listen)?;
        }
    }

    let app = Application::build(config)?;
    let outcome = run(&app, args).await;

    if let Err(e) = app.shutdown().await {
        error!("关闭应用程序时发生错误: {e:#}");
    }
    outcome
}

async fn run(app: &Application, args: CliArgs) -> Result<()> {
    app.start().await?;

    let command = async {
        match args.command {
            CliCommand::Send {
                destination,
                payload,
                priority,
                correlation_id,
            } => {
                let message = cli::build_message(payload, priority, correlation_id);
                app.send(&destination, message).await
            }
            CliCommand::SendBatch { destination, file } => {
                let messages = cli::load_batch(&file)?;
                let report = app.send_batch(&destination, messages).await?;
                for rejected in &report.rejected {
                    warn!(message_id = %rejected.id, error = %rejected.error, "消息未发送");
                }
                Ok(())
            }
            CliCommand::CheckConfig => Ok(()),
        }
    };

    tokio::select! {
        result = command => result,
        _ = wait_for_shutdown_signal() => {
            warn!("收到关闭信号，放弃未完成的发送");
            Err(anyhow::anyhow!("发送被中断"))
        }
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
