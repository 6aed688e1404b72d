use anyhow::Result;

use activity_finder::app::serve;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    serve().await
}
