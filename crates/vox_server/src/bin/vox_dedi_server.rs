use anyhow::Result;
use vox_server::dedicated_server::run_dedicated_server;

fn main() -> Result<()> {
    run_dedicated_server()
}
