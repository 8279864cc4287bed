use super::{json_pretty, Context, Failure, EXIT_STAGE_ERROR, EXIT_SUCCESS};
use sluice_core::CleanupOutcome;

pub fn run(
    ctx: &Context,
    id: Option<&str>,
    force: bool,
    message: Option<&str>,
) -> Result<u8, Failure> {
    let mut stage = match id {
        Some(id) if !force => ctx.claimed(id)?,
        None if !force => {
            return Err(Failure::new(
                EXIT_STAGE_ERROR,
                "a stage id is required unless --force is given",
            ))
        }
        _ => ctx.stage()?,
    };
    let outcome = stage.destroy(force, message)?;

    if ctx.json {
        let payload = serde_json::json!({
            "status": "destroyed",
            "cleanup": outcome,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match &outcome {
            CleanupOutcome::Removed { path } => println!("removed {}", path.display()),
            CleanupOutcome::NotPresent { path } => {
                println!("{} was already gone", path.display());
            }
            CleanupOutcome::Failed { path, error } => {
                eprintln!("warning: could not remove {}: {error}", path.display());
            }
        }
        println!("stage destroyed");
    }
    Ok(EXIT_SUCCESS)
}
