use super::{json_pretty, Context, Failure, EXIT_SUCCESS};
use sluice_core::FailureMarker;

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let marker = FailureMarker::new(&ctx.config.paths.target);
    // An unreadable marker is still cleared.
    let record = marker.read().unwrap_or(None);
    let present = marker.exists();
    marker.clear()?;

    if ctx.json {
        let payload = serde_json::json!({
            "cleared": present,
            "marker": record,
        });
        println!("{}", json_pretty(&payload)?);
    } else if present {
        println!("cleared failure marker at {}", marker.path().display());
        if let Some(record) = record {
            println!("it recorded: {}", record.describe());
        }
    } else {
        println!("no failure marker present");
    }
    Ok(EXIT_SUCCESS)
}
