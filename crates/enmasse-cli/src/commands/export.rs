use super::{open_store, Context, EXIT_SUCCESS};
use enmasse::Exporter;
use std::path::Path;

pub fn run(ctx: &Context, output: &Path) -> Result<u8, String> {
    let config = ctx.config()?;
    let store = open_store(&config)?;

    let document = Exporter::new(&store)
        .export_to_file(output)
        .map_err(|e| e.to_string())?;

    println!(
        "Exported {} object(s) to {}",
        document.len(),
        output.display()
    );
    Ok(EXIT_SUCCESS)
}
