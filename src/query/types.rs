//! Query AST.

/// A substring match against the record's searchable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringMatch {
    pub value: String,
    pub case_sensitive: bool,
}

/// Property filters consult specific fields instead of the searchable
/// text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PropertyKey {
    Status,
    Project,
    Ancestor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMatch {
    pub key: PropertyKey,
    pub value: String,
}

/// A parsed query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpr {
    Str(StringMatch),
    Property(PropertyMatch),
    /// `!!!` — any error suffix anywhere on the record.
    AnyErrorSuffix,
    /// `@@@` — any running-agent suffix.
    AnyRunningAgent,
    /// `$$$` — any running-process suffix.
    AnyRunningProcess,
    Not(Box<QueryExpr>),
    And(Vec<QueryExpr>),
    Or(Vec<QueryExpr>),
}

fn escape_string_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

/// Normalised string form: explicit uppercase AND/OR, quoted strings,
/// shorthand atoms kept as written.
pub fn to_canonical_string(expr: &QueryExpr) -> String {
    match expr {
        QueryExpr::Str(m) => {
            let escaped = escape_string_value(&m.value);
            if m.case_sensitive {
                format!("c\"{escaped}\"")
            } else {
                format!("\"{escaped}\"")
            }
        }
        QueryExpr::Property(p) => format!("{}:{}", p.key, p.value),
        QueryExpr::AnyErrorSuffix => "!!!".to_string(),
        QueryExpr::AnyRunningAgent => "@@@".to_string(),
        QueryExpr::AnyRunningProcess => "$$$".to_string(),
        QueryExpr::Not(inner) => {
            let rendered = to_canonical_string(inner);
            if matches!(**inner, QueryExpr::And(_) | QueryExpr::Or(_)) {
                format!("!({rendered})")
            } else {
                format!("!{rendered}")
            }
        }
        QueryExpr::And(operands) => operands
            .iter()
            .map(|op| {
                let rendered = to_canonical_string(op);
                if matches!(op, QueryExpr::Or(_)) { format!("({rendered})") } else { rendered }
            })
            .collect::<Vec<_>>()
            .join(" AND "),
        QueryExpr::Or(operands) => operands
            .iter()
            .map(|op| {
                let rendered = to_canonical_string(op);
                if matches!(op, QueryExpr::And(_)) { format!("({rendered})") } else { rendered }
            })
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}
