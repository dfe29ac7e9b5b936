use payment_relay::{KafkaConnector, LoopExit, PaymentRelay, RelayConfig, init_logger_from_env};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 设置环境 (dotenv, 日志)
    dotenv::dotenv().ok();
    init_logger_from_env();

    // 2. 加载配置
    let config = RelayConfig::from_env()?;
    tracing::info!("Initializing {}...", config.agent);

    let relay = PaymentRelay::new(config);

    // 3. Ctrl-C 触发优雅退出
    let shutdown = relay.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    // 4. 运行 (bootstrap 失败时退出码非零)
    let summary = match relay.run(&KafkaConnector).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("Relay failed to start: {}", e);
            return Err(e.into());
        }
    };

    match summary.exit {
        LoopExit::Shutdown => tracing::info!("Relay shut down gracefully"),
        LoopExit::Fatal(e) => tracing::error!("Relay stopped on broker error: {}", e),
    }

    Ok(())
}
