use super::{json_pretty, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context, id: &str) -> Result<u8, Failure> {
    let mut stage = ctx.claimed(id)?;
    stage.post_apply()?;
    if ctx.json {
        let payload = serde_json::json!({ "id": id, "status": "post-applied" });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("post-apply complete for stage {id}");
    }
    Ok(EXIT_SUCCESS)
}
