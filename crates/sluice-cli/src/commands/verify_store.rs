use super::{json_pretty, Failure, EXIT_STAGE_ERROR, EXIT_SUCCESS};
use sluice_store::{verify_store_integrity, StoreLayout};
use std::path::Path;

pub fn run(store_path: &Path, json: bool) -> Result<u8, Failure> {
    let layout = StoreLayout::new(store_path);
    let report = verify_store_integrity(&layout)?;

    if json {
        let payload = serde_json::json!({
            "collections": report.collections,
            "checked": report.checked,
            "passed": report.passed,
            "failed": report.failed.iter().map(|f| serde_json::json!({
                "key": f.key,
                "reason": f.reason,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "store integrity: {}/{} records passed",
            report.passed, report.checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.key, f.reason);
        }
    }

    if report.failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STAGE_ERROR)
    }
}
