use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use scheduler_core::models::{ClosedTaskStatus, Row};

mod app;
mod common;

use app::{Application, StoreBackend};
use common::{init_logging, load_config, wait_for_shutdown_signal};

fn labourer_arg() -> Arg {
    Arg::new("labourer")
        .short('L')
        .long("labourer")
        .value_name("ID")
        .help("Labourer ID")
        .required(true)
}

fn task_id_arg(required: bool) -> Arg {
    Arg::new("task-id")
        .short('t')
        .long("task-id")
        .value_name("ID")
        .help("任务ID")
        .required(required)
}

fn cli() -> Command {
    Command::new("scheduler")
        .version("1.0.0")
        .about("Labourer 任务调度核心")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（默认查找 config/scheduler.toml）")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别（覆盖配置文件）")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式（覆盖配置文件）")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .arg(
            Arg::new("in-memory")
                .long("in-memory")
                .help("使用内存存储代替SQLite")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("run").about("运行调度循环直到收到关闭信号"))
        .subcommand(Command::new("cycle").about("执行一个调度周期并输出报告"))
        .subcommand(Command::new("labourers").about("注册并列出所有 Labourer"))
        .subcommand(
            Command::new("create-task")
                .about("创建任务")
                .arg(labourer_arg())
                .arg(task_id_arg(false))
                .arg(
                    Arg::new("payload")
                        .short('p')
                        .long("payload")
                        .value_name("JSON")
                        .help("任务负载（JSON对象）"),
                ),
        )
        .subcommand(
            Command::new("invoke")
                .about("调用任务")
                .arg(labourer_arg())
                .arg(task_id_arg(true)),
        )
        .subcommand(
            Command::new("close")
                .about("标记任务完成")
                .arg(labourer_arg())
                .arg(task_id_arg(true)),
        )
        .subcommand(
            Command::new("archive")
                .about("归档任务")
                .arg(task_id_arg(true))
                .arg(
                    Arg::new("failed")
                        .long("failed")
                        .help("以失败状态归档")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("average-duration")
                .about("计算 Labourer 的平均执行时长")
                .arg(labourer_arg()),
        )
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("序列化输出失败")?
    );
    Ok(())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("缺少参数: --{name}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = load_config(config_path)?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.observability.log_format.clone());
    init_logging(&log_level, &log_format)?;

    let backend = if matches.get_flag("in-memory") {
        StoreBackend::Memory
    } else {
        StoreBackend::Sqlite
    };
    let app = Application::new(config, backend).await?;

    match matches.subcommand() {
        Some(("run", _)) => run(app).await?,
        Some(("cycle", _)) => {
            let reports = app.scheduler().run_cycle().await.context("调度周期执行失败")?;
            print_json(&json!({
                "reports": reports,
                "stats": app.manager().stats(),
            }))?;
        }
        Some(("labourers", _)) => {
            let labourers = app
                .manager()
                .register_labourers()
                .await
                .context("注册Labourer失败")?;
            let listed: Vec<Value> = labourers
                .iter()
                .map(|labourer| json!({"labourer": labourer, "cycle": labourer.cycle()}))
                .collect();
            print_json(&Value::Array(listed))?;
        }
        Some(("create-task", sub)) => {
            let labourer = app.labourer(required(sub, "labourer")?).await?;
            let payload = sub
                .get_one::<String>("payload")
                .map(|raw| Value::String(raw.clone()));
            let task = match sub.get_one::<String>("task-id") {
                Some(task_id) => {
                    app.manager()
                        .create_task_with_id(&labourer, task_id, payload, Row::new())
                        .await
                }
                None => app.manager().create_task(&labourer, payload, Row::new()).await,
            }
            .context("创建任务失败")?;
            print_json(&Value::Object(task))?;
        }
        Some(("invoke", sub)) => {
            let labourer = app.labourer(required(sub, "labourer")?).await?;
            let task_id = required(sub, "task-id")?;
            let outcome = app
                .manager()
                .invoke_task(&labourer, Some(task_id), None)
                .await
                .with_context(|| format!("调用任务失败: {task_id}"))?;
            print_json(&json!({
                "task_id": outcome.task_id(),
                "invoked": outcome.is_invoked(),
            }))?;
        }
        Some(("close", sub)) => {
            let labourer_id = required(sub, "labourer")?;
            let task_id = required(sub, "task-id")?;
            app.manager()
                .close_task(task_id, labourer_id)
                .await
                .with_context(|| format!("关闭任务失败: {task_id}"))?;
            info!("任务 {} 已标记完成", task_id);
        }
        Some(("archive", sub)) => {
            let task_id = required(sub, "task-id")?;
            let status = if sub.get_flag("failed") {
                ClosedTaskStatus::Failed
            } else {
                ClosedTaskStatus::Completed
            };
            app.manager()
                .archive_task_with_status(task_id, status)
                .await
                .with_context(|| format!("归档任务失败: {task_id}"))?;
            info!("任务 {} 已归档", task_id);
        }
        Some(("average-duration", sub)) => {
            let labourer = app.labourer(required(sub, "labourer")?).await?;
            let average = app
                .manager()
                .get_average_labourer_duration(&labourer)
                .await
                .context("计算平均时长失败")?;
            print_json(&json!({"labourer_id": labourer.id, "average_duration": average}))?;
        }
        Some((other, _)) => return Err(anyhow::anyhow!("不支持的子命令: {other}")),
        None => return Err(anyhow::anyhow!("缺少子命令")),
    }

    Ok(())
}

async fn run(app: Application) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let app = std::sync::Arc::new(app);
    let handle = {
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await?;
    info!("收到关闭信号，开始优雅关闭...");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(Duration::from_secs(30), handle).await {
        Ok(Ok(())) => info!("调度器已优雅关闭"),
        Ok(Err(e)) => error!("调度器关闭时发生错误: {e}"),
        Err(_) => warn!("调度器关闭超时，强制退出"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn test_parse_create_task() {
        let matches = cli()
            .try_get_matches_from([
                "scheduler",
                "--in-memory",
                "create-task",
                "--labourer",
                "some_function",
                "--payload",
                "{\"foo\": 1}",
            ])
            .unwrap();

        assert!(matches.get_flag("in-memory"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "create-task");
        assert_eq!(required(sub, "labourer").unwrap(), "some_function");
        assert!(sub.get_one::<String>("task-id").is_none());
    }

    #[test]
    fn test_invoke_requires_task_id() {
        let result = cli().try_get_matches_from(["scheduler", "invoke", "--labourer", "x"]);
        assert!(result.is_err());
    }
}
