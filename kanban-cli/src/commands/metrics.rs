use super::{CliResult, Context};

pub async fn run(ctx: &Context) -> CliResult {
    let gateway = ctx.gateway()?;
    let text = gateway.metrics().await;
    gateway.shutdown().await;
    print!("{}", text?);
    Ok(())
}
