use anyhow::Result;

fn main() -> Result<()> {
    runscope::cli::run()
}
