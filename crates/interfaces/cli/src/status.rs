use std::fmt::Write as _;

use anyhow::Result;

use updated_config::UpdaterConfig;
use updated_exec::{MountTool, OverlayMounter};
use updated_params::{FileParams, ParamKey, StatusStore};
use updated_runtime::{ConsistencyFlag, ExclusiveLock};

pub(crate) fn render(config: &UpdaterConfig) -> Result<String> {
    let params = FileParams::new(&config.paths.params_dir);
    render_with(config, &params, &OverlayMounter)
}

pub(crate) fn render_with(
    config: &UpdaterConfig,
    params: &dyn StatusStore,
    mounts: &dyn MountTool,
) -> Result<String> {
    let staging = config.staging();
    let mut out = String::new();

    writeln!(out, "params ({})", config.paths.params_dir.display())?;
    for key in ParamKey::ALL {
        let value = match params.get(key)? {
            Some(raw) => format!("{:?}", String::from_utf8_lossy(&raw)),
            None => "-".to_string(),
        };
        writeln!(out, "  {:<18} {value}", key.as_str())?;
    }

    let consistent = ConsistencyFlag::new(staging.consistent_flag()).is_set();
    writeln!(out, "staging ({})", staging.root.display())?;
    writeln!(out, "  finalized consistent: {}", yes_no(consistent))?;
    writeln!(
        out,
        "  overlay mounted:      {}",
        yes_no(mounts.is_mounted(&staging.merged))
    )?;

    let running = match ExclusiveLock::is_held(&config.paths.lock_file) {
        Ok(held) => yes_no(held).to_string(),
        Err(err) => format!("unknown ({err})"),
    };
    writeln!(out, "  daemon running:       {running}")?;
    Ok(out)
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
