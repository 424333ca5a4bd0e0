#![no_main]
use libfuzzer_sys::fuzz_target;

// Parse, validate and convert; every step may reject, none may panic.
fn check(data: &str) -> eyre::Result<()> {
    let cfg = toml::from_str::<bms_config::Config>(data)?;
    cfg.validate()?;
    let runtime = bms_core::ControllerCfg::from(&cfg);
    // a config that passed validation must also pass the runtime checks
    if let Err(e) = runtime.validate() {
        panic!("validated config rejected at runtime: {e}");
    }
    Ok(())
}

fuzz_target!(|data: &str| {
    let _ = check(data);
});
