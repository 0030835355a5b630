use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    sessionq_mcp::main_entry().await
}
