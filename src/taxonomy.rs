//! Maps upstream `action_type` strings onto the canonical metric buckets.
//!
//! The rule table is evaluated top to bottom and the first matching rule wins.
//! Reordering rules changes which bucket an ambiguous type lands in, so new
//! rules go where their precedence belongs, not at the end.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
  Actions,
  ConversionValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionBucket {
  Engagement,
  PhotoView,
  Messaging { new_contact: bool },
  LinkClick,
  Purchase,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified {
  pub bucket: ActionBucket,
  pub value: f64,
}

pub struct ActionRule {
  pub name: &'static str,
  pub matches: fn(&str) -> bool,
  pub bucket: fn(&str) -> ActionBucket,
}

const MESSAGING_EXACT: [&str; 3] = [
  "messaging_conversation_started",
  "messaging_first_reply",
  "new_messaging_connection",
];

fn is_post_engagement(t: &str) -> bool {
  t == "post_engagement"
}

fn is_photo_view(t: &str) -> bool {
  t == "photo_view"
}

fn is_messaging(t: &str) -> bool {
  t.starts_with("onsite_conversion.messaging")
    || MESSAGING_EXACT.contains(&t)
    || (t.contains("messaging") && (t.contains("conversation") || t.contains("first_reply")))
}

fn is_conversation_start(t: &str) -> bool {
  t.contains("conversation") || t == "new_messaging_connection" || t == "messaging_conversation_started"
}

fn is_link_click(t: &str) -> bool {
  t == "link_click" || t == "landing_page_view"
}

fn is_purchase(t: &str) -> bool {
  t.contains("purchase")
}

fn engagement(_: &str) -> ActionBucket {
  ActionBucket::Engagement
}

fn photo_view(_: &str) -> ActionBucket {
  ActionBucket::PhotoView
}

fn messaging(t: &str) -> ActionBucket {
  ActionBucket::Messaging {
    new_contact: is_conversation_start(t),
  }
}

fn link_click(_: &str) -> ActionBucket {
  ActionBucket::LinkClick
}

fn purchase(_: &str) -> ActionBucket {
  ActionBucket::Purchase
}

pub static RULES: [ActionRule; 5] = [
  ActionRule {
    name: "post_engagement",
    matches: is_post_engagement,
    bucket: engagement,
  },
  ActionRule {
    name: "photo_view",
    matches: is_photo_view,
    bucket: photo_view,
  },
  ActionRule {
    name: "messaging",
    matches: is_messaging,
    bucket: messaging,
  },
  ActionRule {
    name: "link_click",
    matches: is_link_click,
    bucket: link_click,
  },
  ActionRule {
    name: "purchase",
    matches: is_purchase,
    bucket: purchase,
  },
];

pub fn normalize_action_type(action_type: &str) -> String {
  action_type.trim().to_ascii_lowercase()
}

/// Index of the rule that owns `action_type`, if any.
pub fn matching_rule(action_type: &str) -> Option<usize> {
  let t = normalize_action_type(action_type);
  RULES.iter().position(|rule| (rule.matches)(&t))
}

pub fn classify(action_type: &str, value: f64) -> Option<Classified> {
  let t = normalize_action_type(action_type);
  let rule = RULES.iter().find(|rule| (rule.matches)(&t))?;
  let value = if value.is_finite() && value > 0.0 { value } else { 0.0 };
  Some(Classified {
    bucket: (rule.bucket)(&t),
    value,
  })
}
