use anyhow::Result;

fn main() -> Result<()> {
    herald::cli::run()
}
