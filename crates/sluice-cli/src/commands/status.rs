use super::{json_pretty, print_results, Context, Failure, EXIT_SUCCESS, EXIT_VALIDATION_FAILED};
use sluice_core::status_check;
use sluice_schema::overall_status;

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let stage = ctx.stage()?;
    let results = status_check(&stage)?;
    let overall = overall_status(&results);

    if ctx.json {
        let payload = serde_json::json!({
            "status": overall,
            "results": results,
        });
        println!("{}", json_pretty(&payload)?);
    } else if results.is_empty() {
        println!("status: ok");
    } else {
        println!("status: {overall}");
        print_results(&results);
    }

    if results.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_VALIDATION_FAILED)
    }
}
