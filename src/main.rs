/// Canvass - survey collection service
use canvass::{config::ServerConfig, context::AppContext, error::ApiResult, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ApiResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canvass=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    let config = ServerConfig::from_env()?;
    config.validate()?;

    let ctx = AppContext::new(config).await?;

    spawn_cleanup(ctx.clone());

    server::serve(ctx).await?;

    Ok(())
}

/// Hourly sweep of expired refresh tokens and sessions
fn spawn_cleanup(ctx: AppContext) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            if let Err(e) = ctx.auth.cleanup_expired_tokens().await {
                tracing::error!(error = %e, "refresh token cleanup failed");
            }
            match ctx.sessions.cleanup_expired().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "cleaned up expired sessions");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "session cleanup failed"),
            }
        }
    });
}

fn print_banner() {
    println!(
        r#"
   ______
  / ____/___ _____ _   ______ ___________
 / /   / __ `/ __ \ | / / __ `/ ___/ ___/
/ /___/ /_/ / / / / |/ / /_/ (__  |__  )
\____/\__,_/_/ /_/|___/\__,_/____/____/

        Survey Collection Service v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
