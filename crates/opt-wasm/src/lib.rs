//! WebAssembly bindings for the OptShield rule compiler.
//!
//! The extension's background script hands the current config record (and
//! the tracker category index) over as JSON and gets back the rule changes
//! to feed the declarative-net-request API. Only the pure compiler crosses
//! the boundary; the reactive engine stays outside this build.

use wasm_bindgen::prelude::*;

use opt_compiler::{compile, Platform};
use opt_core::categories::{should_negate, Category, TrackerIndex};
use opt_core::config::ConfigRecord;
use opt_core::rules::NetRule;

/// Compile a config record into rule changes.
///
/// `config_json` is the serialized record, `trackers_json` a pattern ->
/// category map, `installed_json` the host's current dynamic rules, and
/// `platform` either `"chromium"` or `"safari"`. Returns
/// `{ update, rulesets, skippedFilters }` as JSON.
#[wasm_bindgen]
pub fn compile_config(
    config_json: &str,
    trackers_json: &str,
    installed_json: &str,
    platform: &str,
) -> Result<String, JsValue> {
    match compile_config_impl(config_json, trackers_json, installed_json, platform) {
        Ok(output) => Ok(output),
        Err(message) => {
            #[cfg(target_arch = "wasm32")]
            web_sys::console::warn_1(&JsValue::from_str(&message));
            Err(JsValue::from_str(&message))
        }
    }
}

/// Whether a tracker exception must flip its category's block/allow polarity.
#[wasm_bindgen]
pub fn should_negate_exception(category: &str, overwrite_status: bool) -> Result<bool, JsValue> {
    should_negate_impl(category, overwrite_status).map_err(|e| JsValue::from_str(&e))
}

/// Build metadata for diagnostics surfaces.
#[wasm_bindgen]
pub fn get_compiler_info() -> JsValue {
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(
        &result,
        &"version".into(),
        &JsValue::from_str(env!("CARGO_PKG_VERSION")),
    );
    let _ = js_sys::Reflect::set(&result, &"platforms".into(), &{
        let platforms = js_sys::Array::new();
        platforms.push(&JsValue::from_str("chromium"));
        platforms.push(&JsValue::from_str("safari"));
        platforms.into()
    });
    result.into()
}

fn compile_config_impl(
    config_json: &str,
    trackers_json: &str,
    installed_json: &str,
    platform: &str,
) -> Result<String, String> {
    let config: ConfigRecord =
        serde_json::from_str(config_json).map_err(|e| format!("Failed to parse config: {e}"))?;
    let trackers: std::collections::HashMap<String, Category> =
        serde_json::from_str(trackers_json)
            .map_err(|e| format!("Failed to parse trackers: {e}"))?;
    let installed: Vec<NetRule> = serde_json::from_str(installed_json)
        .map_err(|e| format!("Failed to parse installed rules: {e}"))?;
    let platform = parse_platform(platform)?;

    let output = compile(&config, &TrackerIndex::from_entries(trackers), platform, &installed);
    let result = serde_json::json!({
        "update": output.update,
        "rulesets": output.rulesets,
        "skippedFilters": output.skipped_filters,
    });
    serde_json::to_string(&result).map_err(|e| format!("Failed to serialize output: {e}"))
}

fn should_negate_impl(category: &str, overwrite_status: bool) -> Result<bool, String> {
    let category: Category =
        serde_json::from_value(serde_json::Value::String(category.to_string()))
            .map_err(|_| format!("Unknown category: {category}"))?;
    Ok(should_negate(category.blocked_by_default(), overwrite_status))
}

fn parse_platform(platform: &str) -> Result<Platform, String> {
    match platform {
        "chromium" => Ok(Platform::Chromium),
        "safari" => Ok(Platform::Safari),
        other => Err(format!("Unknown platform: {other}")),
    }
}
