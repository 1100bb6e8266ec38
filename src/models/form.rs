// src/models/form.rs

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::utils::html::clean_html;

/// Sentinel item id a client sends to open a test (instructions page, no question).
pub const COVER_ITEM_ID: &str = "cover";

/// One item of a test form.
///
/// Items arrive from the form provider; the candidate-facing copy kept in the
/// cache never carries `grading`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormItem {
    Question(QuestionItem),
    Image(ImageItem),
    Video(VideoItem),
    Text(TextItem),
    PageBreak(PageBreakItem),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub item_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub question: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Media>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading: Option<Grading>,
}

/// The answer shape of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Choice {
        choice_type: ChoiceType,
        options: Vec<ChoiceOption>,
    },
    Text {
        paragraph: bool,
    },
    Scale {
        low: i64,
        high: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low_label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        high_label: Option<String>,
    },
    Date,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceType {
    Radio,
    Checkbox,
    DropDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Media>,
}

/// Authoritative grading metadata of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grading {
    pub point_value: i64,
    pub correct_answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    pub item_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image: Media,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    pub item_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub youtube_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub item_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageBreakItem {
    pub item_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An image reference, either still pointing at the provider or inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Media {
    Remote {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt_text: Option<String>,
    },
    Embedded {
        data_uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt_text: Option<String>,
    },
}

/// Raw bytes of a downloaded media object.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MediaPayload {
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.bytes)
        )
    }
}

impl Media {
    /// Uri still to be downloaded, if any.
    pub fn remote_uri(&self) -> Option<&str> {
        match self {
            Media::Remote { uri, .. } => Some(uri),
            Media::Embedded { .. } => None,
        }
    }

    /// Replaces a remote reference with the inlined payload.
    pub fn embed(&mut self, payload: &MediaPayload) {
        let alt_text = match self {
            Media::Remote { alt_text, .. } | Media::Embedded { alt_text, .. } => alt_text.take(),
        };
        *self = Media::Embedded {
            data_uri: payload.to_data_uri(),
            alt_text,
        };
    }
}

impl FormItem {
    pub fn id(&self) -> &str {
        match self {
            FormItem::Question(q) => &q.item_id,
            FormItem::Image(i) => &i.item_id,
            FormItem::Video(v) => &v.item_id,
            FormItem::Text(t) => &t.item_id,
            FormItem::PageBreak(p) => &p.item_id,
        }
    }

    pub fn grading(&self) -> Option<&Grading> {
        match self {
            FormItem::Question(q) => q.grading.as_ref(),
            _ => None,
        }
    }

    /// Removes the correct answers so the item can be shown to a candidate.
    pub fn strip_grading(&mut self) {
        if let FormItem::Question(q) = self {
            q.grading = None;
        }
    }

    /// Every media slot of the item, in display order.
    pub fn media_mut(&mut self) -> Vec<&mut Media> {
        match self {
            FormItem::Question(q) => {
                let mut slots: Vec<&mut Media> = q.image.iter_mut().collect();
                if let QuestionKind::Choice { options, .. } = &mut q.question {
                    slots.extend(options.iter_mut().filter_map(|o| o.image.as_mut()));
                }
                slots
            }
            FormItem::Image(i) => vec![&mut i.image],
            _ => Vec::new(),
        }
    }

    /// Sanitizes the display text (title, description). Option values are left
    /// untouched since candidates answer with them verbatim.
    pub fn sanitize_text(&mut self) {
        let (title, description) = match self {
            FormItem::Question(q) => (&mut q.title, &mut q.description),
            FormItem::Image(i) => (&mut i.title, &mut i.description),
            FormItem::Video(v) => (&mut v.title, &mut v.description),
            FormItem::Text(t) => (&mut t.title, &mut t.description),
            FormItem::PageBreak(p) => (&mut p.title, &mut p.description),
        };
        *title = clean_html(title);
        if let Some(d) = description.as_mut() {
            *d = clean_html(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice_question() -> FormItem {
        FormItem::Question(QuestionItem {
            item_id: "q1".into(),
            title: "Pick <script>alert(1)</script>one".into(),
            description: None,
            required: true,
            question: QuestionKind::Choice {
                choice_type: ChoiceType::Radio,
                options: vec![
                    ChoiceOption {
                        value: "A & B".into(),
                        image: Some(Media::Remote {
                            uri: "https://img/a.png".into(),
                            alt_text: None,
                        }),
                    },
                    ChoiceOption {
                        value: "C".into(),
                        image: None,
                    },
                ],
            },
            image: Some(Media::Remote {
                uri: "https://img/q.png".into(),
                alt_text: Some("diagram".into()),
            }),
            grading: Some(Grading {
                point_value: 5,
                correct_answers: vec!["C".into()],
            }),
        })
    }

    #[test]
    fn strip_grading_removes_answers() {
        let mut item = choice_question();
        assert!(item.grading().is_some());
        item.strip_grading();
        assert!(item.grading().is_none());
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("correct_answers"));
    }

    #[test]
    fn media_slots_cover_question_and_option_images() {
        let mut item = choice_question();
        let uris: Vec<String> = item
            .media_mut()
            .into_iter()
            .filter_map(|m| m.remote_uri().map(str::to_string))
            .collect();
        assert_eq!(uris, vec!["https://img/q.png", "https://img/a.png"]);
    }

    #[test]
    fn embed_keeps_alt_text() {
        let mut media = Media::Remote {
            uri: "https://img/q.png".into(),
            alt_text: Some("diagram".into()),
        };
        media.embed(&MediaPayload {
            content_type: "image/png".into(),
            bytes: vec![1, 2, 3],
        });
        assert_eq!(
            media,
            Media::Embedded {
                data_uri: "data:image/png;base64,AQID".into(),
                alt_text: Some("diagram".into()),
            }
        );
    }

    #[test]
    fn sanitize_text_leaves_option_values() {
        let mut item = choice_question();
        item.sanitize_text();
        let FormItem::Question(q) = &item else {
            panic!("expected question");
        };
        assert!(!q.title.contains("<script>"));
        let QuestionKind::Choice { options, .. } = &q.question else {
            panic!("expected choice");
        };
        assert_eq!(options[0].value, "A & B");
    }

    #[test]
    fn items_are_tagged_by_kind() {
        let item = FormItem::PageBreak(PageBreakItem {
            item_id: "pb".into(),
            title: "Section 2".into(),
            description: None,
        });
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["kind"], "page_break");
        assert_eq!(value["item_id"], "pb");
    }
}
