use anyhow::{Error, Result};
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// `RUST_LOG` が未設定の場合は `info` を既定とする。`MOTIF_WORKER_LOG_FORMAT=json`
/// のときは JSON 形式、それ以外は人間向けのコンパクト形式で標準エラーに出力する。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init() -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("MOTIF_WORKER_LOG_FORMAT")
            .is_ok_and(|v| v.eq_ignore_ascii_case("json"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = if json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .json(),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init()
        };
        result.map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;

        info!(json, "tracing initialized");
        Ok::<(), Error>(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init().expect("first init");
        init().expect("second init");
    }
}
