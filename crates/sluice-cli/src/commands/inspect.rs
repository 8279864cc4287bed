use super::{colorize_state, json_pretty, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let info = ctx.stage()?.inspect()?;
    if ctx.json {
        println!("{}", json_pretty(&info)?);
        return Ok(EXIT_SUCCESS);
    }

    let or_none = |v: Option<String>| v.unwrap_or_else(|| "(none)".to_owned());
    println!("state:            {}", colorize_state(info.state));
    println!("id:               {}", or_none(info.id.map(|i| i.to_string())));
    println!("type:             {}", or_none(info.type_tag.map(|t| t.to_string())));
    println!(
        "owner:            {}{}",
        or_none(info.owner.map(|o| o.to_string())),
        if info.owned_by_caller { " (you)" } else { "" }
    );
    println!("target:           {}", info.target.display());
    println!("staging_root:     {}", info.staging_root.display());
    println!(
        "apply_started_at: {}",
        or_none(info.apply_started_at.map(|t| t.to_rfc3339()))
    );
    println!("applying:         {}", info.applying);
    println!("changes_applied:  {}", info.changes_applied);
    if let Some(marker) = &info.failure_marker {
        println!("failure_marker:   {}", marker.describe());
    }
    if let Some(err) = &info.failure_marker_unreadable {
        println!("failure_marker:   present but unreadable ({err})");
    }
    Ok(EXIT_SUCCESS)
}
