use super::{json_pretty, spin_fail, spin_ok, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context, id: &str) -> Result<u8, Failure> {
    ctx.check_prereqs()?;
    let mut stage = ctx.claimed(id)?;

    let pb = ctx.spinner("applying stage...");
    match stage.apply(ctx.apply_timeout()) {
        Ok(()) => spin_ok(pb.as_ref(), "stage applied"),
        Err(e) => {
            spin_fail(pb.as_ref(), "apply failed");
            return Err(e.into());
        }
    }

    if ctx.json {
        let payload = serde_json::json!({
            "id": id,
            "target": stage.target(),
            "status": "applied"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("applied to {}", stage.target().display());
        println!("run `sluice post-apply {id}` to finish");
    }
    Ok(EXIT_SUCCESS)
}
