/// A directive recognized at the start of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `[N]` with a positive N
    Limit(usize),
    /// `model:<name>`
    Model(String),
    /// Looked like a directive but its value is unusable; the text is kept
    Invalid { text: String, reason: String },
}

const MODEL_PREFIX: &str = "model:";

/// Split one directive off the front of `input` (which must be trimmed at
/// the start). Returns the directive and the remaining input, or `None`
/// when `input` does not start with a directive.
pub fn next_directive(input: &str) -> Option<(Directive, &str)> {
    if let Some(body) = input.strip_prefix('[') {
        let close = body.find(']')?;
        let inner = body[..close].trim();
        let text = &input[..close + 2];
        let rest = &input[close + 2..];

        if !is_integer(inner) {
            // [draft] and friends are plain query text
            return None;
        }

        let directive = match inner.parse::<i64>() {
            Ok(n) if n > 0 => match usize::try_from(n) {
                Ok(n) => Directive::Limit(n),
                Err(_) => invalid(text, "result count is too large"),
            },
            Ok(_) => invalid(text, "result count must be a positive integer"),
            Err(_) => invalid(text, "result count is too large"),
        };
        return Some((directive, rest));
    }

    if starts_with_ignore_case(input, MODEL_PREFIX) {
        let body = &input[MODEL_PREFIX.len()..];
        let end = body
            .find(|c: char| c.is_whitespace() || c == '|')
            .unwrap_or(body.len());
        let name = &body[..end];
        let rest = &body[end..];

        if name.is_empty() {
            let text = &input[..MODEL_PREFIX.len()];
            return Some((invalid(text, "model name is missing"), rest));
        }
        return Some((Directive::Model(name.to_string()), rest));
    }

    None
}

fn invalid(text: &str, reason: &str) -> Directive {
    Directive::Invalid {
        text: text.to_string(),
        reason: reason.to_string(),
    }
}

/// Optional sign followed by ASCII digits.
fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn starts_with_ignore_case(input: &str, prefix: &str) -> bool {
    input
        .get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}
