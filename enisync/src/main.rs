use enisync::runtime::{Runtime, driver, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let runtime = Runtime::new()?;
    logging::init(runtime.conf.log_level);

    driver::run(runtime).await?;
    Ok(())
}
