//! `{{placeholder}}` template expansion.
//!
//! Strict: an unknown placeholder is a `Template` error rather than a
//! silent blank, so a typo in a campaign template fails that step's
//! dispatch instead of sending "Hi ," to a prospect.

use regex::Regex;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::TemplateRenderer;
use cadence_core::types::RenderContext;

pub struct PlaceholderRenderer {
    pattern: Regex,
}

impl PlaceholderRenderer {
    pub fn new() -> Self {
        // Literal pattern, cannot fail to compile
        let pattern = Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("placeholder pattern");
        Self { pattern }
    }
}

impl Default for PlaceholderRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, ctx: &RenderContext) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in self.pattern.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            let key = &caps[1];
            let value = ctx.get(key).ok_or_else(|| {
                CadenceError::Template(format!("unknown placeholder {{{{{key}}}}}"))
            })?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}
