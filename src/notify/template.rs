//! Per-project message rendering (WhatsApp markup).

use crate::alert::{Alert, FieldStyle, ProjectTemplate, TemplateField};

/// Field names a template may reference.
pub const TEMPLATE_FIELDS: [&str; 8] = [
    "title",
    "content",
    "url",
    "author",
    "network",
    "reach",
    "engagement",
    "date",
];

/// Render `alert` with the project's template: configured fields only, in
/// ascending `order`, skipping fields the alert has no value for.
pub fn format_alert(alert: &Alert, template: &ProjectTemplate) -> String {
    let mut fields: Vec<(&String, &TemplateField)> = template.fields.iter().collect();
    fields.sort_by(|a, b| a.1.order.cmp(&b.1.order).then_with(|| a.0.cmp(b.0)));

    let mut lines = Vec::with_capacity(fields.len());
    for (name, cfg) in fields {
        let key = name.trim().to_ascii_lowercase();
        let Some(value) = field_value(alert, &key) else {
            continue;
        };
        let styled = apply_style(&value, cfg.style);
        if cfg.show_label {
            let label = label_for(alert, &key, cfg, template);
            lines.push(format!("{label}: {styled}"));
        } else {
            lines.push(styled);
        }
    }
    lines.join("\n")
}

/// Join rendered blocks into one digest message. Blocks are separated by a
/// blank line so each alert reads as its own paragraph in the chat client.
pub fn join_digest(blocks: &[String]) -> String {
    blocks.join("\n\n")
}

fn field_value(alert: &Alert, key: &str) -> Option<String> {
    let text = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    match key {
        "title" => text(&alert.title),
        "content" => text(&alert.content),
        "url" => Some(alert.url.clone()).filter(|u| !u.is_empty()),
        "author" => text(&alert.author),
        "network" => text(&alert.network),
        "reach" => alert.reach.map(group_thousands),
        "engagement" => alert.engagement.map(group_thousands),
        "date" => {
            let parts: Vec<String> = [text(&alert.published_at), text(&alert.published_time)]
                .into_iter()
                .flatten()
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        other => {
            tracing::debug!(target: "dispatch", field = other, "unknown template field ignored");
            None
        }
    }
}

/// Network-specific metric label → configured field label → field name.
fn label_for(alert: &Alert, key: &str, cfg: &TemplateField, template: &ProjectTemplate) -> String {
    if matches!(key, "reach" | "engagement") {
        let network = alert
            .network
            .as_deref()
            .map(|n| n.trim().to_lowercase())
            .unwrap_or_default();
        if let Some(labels) = template.metric_labels.get(&network) {
            let hit = if key == "reach" {
                labels.reach.as_ref()
            } else {
                labels.engagement.as_ref()
            };
            if let Some(l) = hit {
                return l.clone();
            }
        }
    }
    cfg.label.clone().unwrap_or_else(|| capitalize(key))
}

fn apply_style(value: &str, style: FieldStyle) -> String {
    match style {
        FieldStyle::Plain => value.to_string(),
        FieldStyle::Bold => format!("*{value}*"),
        FieldStyle::Italic => format!("_{value}_"),
        FieldStyle::Strike => format!("~{value}~"),
        FieldStyle::Mono => format!("```{value}```"),
    }
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(first) => first.to_uppercase().chain(c).collect(),
        None => String::new(),
    }
}

/// `1234567` → `1,234,567`.
fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MetricLabels;

    fn field(order: u32, style: FieldStyle, show_label: bool) -> TemplateField {
        TemplateField {
            order,
            style,
            label: None,
            show_label,
        }
    }

    fn sample() -> Alert {
        Alert {
            title: Some("Acme opens plant".into()),
            content: Some("Acme opened a new plant today".into()),
            url: "http://news.com/acme".into(),
            author: Some("Daily News".into()),
            reach: Some(12_500),
            network: Some("Facebook".into()),
            published_at: Some("2024-01-03".into()),
            published_time: Some("08:15".into()),
            ..Alert::default()
        }
    }

    #[test]
    fn renders_in_order_and_omits_unconfigured() {
        let mut t = ProjectTemplate::default();
        t.fields.insert("url".into(), field(3, FieldStyle::Plain, false));
        t.fields.insert("title".into(), field(1, FieldStyle::Bold, false));
        t.fields.insert("date".into(), field(2, FieldStyle::Italic, false));

        let out = format_alert(&sample(), &t);
        assert_eq!(out, "*Acme opens plant*\n_2024-01-03 08:15_\nhttp://news.com/acme");
    }

    #[test]
    fn metric_labels_follow_network_config() {
        let mut t = ProjectTemplate::default();
        t.fields.insert("reach".into(), field(1, FieldStyle::Plain, true));
        t.metric_labels.insert(
            "facebook".into(),
            MetricLabels {
                reach: Some("Seguidores".into()),
                engagement: None,
            },
        );

        assert_eq!(format_alert(&sample(), &t), "Seguidores: 12,500");

        let mut post = sample();
        post.network = Some("instagram".into());
        assert_eq!(format_alert(&post, &t), "Reach: 12,500");
    }

    #[test]
    fn configured_label_and_missing_values() {
        let mut t = ProjectTemplate::default();
        t.fields.insert(
            "engagement".into(),
            TemplateField {
                order: 1,
                style: FieldStyle::Plain,
                label: Some("Interacciones".into()),
                show_label: true,
            },
        );
        t.fields.insert("author".into(), field(0, FieldStyle::Plain, true));

        let mut a = sample();
        a.engagement = Some(0);
        assert_eq!(format_alert(&a, &t), "Author: Daily News\nInteracciones: 0");

        a.engagement = None;
        assert_eq!(format_alert(&a, &t), "Author: Daily News");
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(-1_234_567), "-1,234,567");
    }

    #[test]
    fn digest_blocks_are_separated_by_a_blank_line() {
        let blocks = vec!["*A*\nhttp://a".to_string(), "*B*\nhttp://b".to_string()];
        assert_eq!(join_digest(&blocks), "*A*\nhttp://a\n\n*B*\nhttp://b");
        assert_eq!(join_digest(&blocks[..1]), "*A*\nhttp://a");
    }
}
