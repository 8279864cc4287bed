use super::{json_pretty, spin_fail, spin_ok, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    ctx.check_prereqs()?;
    let mut stage = ctx.stage()?;

    let pb = ctx.spinner("creating stage...");
    let id = match stage.create(ctx.timeout()) {
        Ok(id) => {
            spin_ok(pb.as_ref(), "stage created");
            id
        }
        Err(e) => {
            spin_fail(pb.as_ref(), "create failed");
            return Err(e.into());
        }
    };
    let stage_dir = stage.stage_directory()?;

    if ctx.json {
        let payload = serde_json::json!({
            "id": id,
            "owner": ctx.owner,
            "stage_directory": stage_dir,
            "status": "created"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("created stage {}", id.short());
        println!("id:        {id}");
        println!("directory: {}", stage_dir.display());
    }
    Ok(EXIT_SUCCESS)
}
