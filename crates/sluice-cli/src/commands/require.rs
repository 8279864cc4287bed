use super::{json_pretty, spin_fail, spin_ok, Context, Failure, EXIT_SUCCESS};
use sluice_core::CoreError;
use sluice_schema::ChangeSet;

pub fn run(ctx: &Context, id: &str, packages: &[String], dev: &[String]) -> Result<u8, Failure> {
    let change_set = ChangeSet::parse(packages, dev).map_err(CoreError::from)?;
    ctx.check_prereqs()?;
    let mut stage = ctx.claimed(id)?;

    let pb = ctx.spinner("staging requirements...");
    match stage.modify(&change_set, ctx.timeout()) {
        Ok(()) => spin_ok(pb.as_ref(), "requirements staged"),
        Err(e) => {
            spin_fail(pb.as_ref(), "staging failed");
            return Err(e.into());
        }
    }

    if ctx.json {
        let payload = serde_json::json!({
            "id": id,
            "change_set": change_set,
            "status": "staged"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for req in change_set.runtime.iter().chain(&change_set.dev) {
            println!("staged {req}");
        }
    }
    Ok(EXIT_SUCCESS)
}
