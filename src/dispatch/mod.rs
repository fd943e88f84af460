pub mod delay;
pub mod filters;
pub mod pool;
pub mod selection;
pub mod worker;

use serde_json::Value;

/// Literal `{name}` substitution from the task's variable bag. Only string
/// values substitute; everything else is left in place.
pub fn render_template(content: &str, variables: &Value) -> String {
    let mut out = content.to_string();
    if let Some(map) = variables.as_object() {
        for (key, value) in map {
            if let Some(text) = value.as_str() {
                out = out.replace(&format!("{{{key}}}"), text);
            }
        }
    }
    out
}
