// src/clients/forms.rs

//! Form provider collaborator: question definitions, media and the file
//! change feed.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use url::Url;

use crate::{
    error::AppError,
    models::form::{
        ChoiceOption, ChoiceType, FormItem, Grading, ImageItem, Media, MediaPayload,
        PageBreakItem, QuestionItem, QuestionKind, TextItem, VideoItem,
    },
};

static FORM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid form id pattern"));

/// Trust level of a form fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormView {
    /// Shown to candidates; grading is dropped.
    Candidate,
    /// Used for grading; grading is kept.
    Authoritative,
}

/// Position in the provider's change feed. Owned by whoever polls the feed.
#[derive(Debug, Clone, Default)]
pub struct ChangeCursor {
    page_token: Option<String>,
}

impl ChangeCursor {
    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }
}

#[async_trait]
pub trait FormProvider: Send + Sync {
    async fn fetch_form(&self, form_id: &str, view: FormView) -> Result<Vec<FormItem>, AppError>;

    async fn fetch_media(&self, uri: &str) -> Result<MediaPayload, AppError>;

    /// Ids of files changed since `cursor`, advancing it.
    async fn changed_files(&self, cursor: &mut ChangeCursor) -> Result<Vec<String>, AppError>;
}

/// HTTP client for a Google-Forms-compatible provider API.
#[derive(Debug, Clone)]
pub struct FormsClient {
    http: reqwest::Client,
    forms_base: Url,
    drive_base: Url,
    token: Option<String>,
}

impl FormsClient {
    pub fn new(
        http: reqwest::Client,
        forms_base: &str,
        drive_base: &str,
        token: Option<String>,
    ) -> Result<Self, AppError> {
        let parse = |raw: &str| {
            Url::parse(raw)
                .map_err(|e| AppError::InternalServerError(format!("invalid api base {raw}: {e}")))
        };
        Ok(Self {
            http,
            forms_base: parse(forms_base)?,
            drive_base: parse(drive_base)?,
            token,
        })
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url, AppError> {
        base.join(path)
            .map_err(|e| AppError::InternalServerError(format!("invalid endpoint {path}: {e}")))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, AppError> {
        let mut req = self.http.get(url.clone());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!(
                "form provider has no resource at {}",
                url.path()
            ))),
            s => Err(AppError::InternalServerError(format!(
                "form provider returned {} for {}",
                s,
                url.path()
            ))),
        }
    }
}

#[async_trait]
impl FormProvider for FormsClient {
    async fn fetch_form(&self, form_id: &str, view: FormView) -> Result<Vec<FormItem>, AppError> {
        if !FORM_ID.is_match(form_id) {
            return Err(AppError::BadRequest(format!("invalid form id {:?}", form_id)));
        }
        let url = Self::endpoint(&self.forms_base, &format!("v1/forms/{}", form_id))?;
        let form: WireForm = self.get_json(url).await?;

        let mut items = Vec::with_capacity(form.items.len());
        for wire in form.items {
            let item_id = wire.item_id.clone();
            match wire.into_item() {
                Some(mut item) => {
                    if view == FormView::Candidate {
                        item.strip_grading();
                    }
                    items.push(item);
                }
                None => tracing::warn!(form_id, item_id = %item_id, "Skipping unsupported form item"),
            }
        }
        Ok(items)
    }

    async fn fetch_media(&self, uri: &str) -> Result<MediaPayload, AppError> {
        let url = Url::parse(uri)
            .map_err(|e| AppError::BadRequest(format!("invalid media uri {uri}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::BadRequest(format!(
                "unsupported media scheme {}",
                url.scheme()
            )));
        }
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::InternalServerError(format!(
                "media download returned {}",
                resp.status()
            )));
        }
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        Ok(MediaPayload {
            content_type,
            bytes,
        })
    }

    async fn changed_files(&self, cursor: &mut ChangeCursor) -> Result<Vec<String>, AppError> {
        let token = match cursor.page_token.clone() {
            Some(token) => token,
            None => {
                let url = Self::endpoint(&self.drive_base, "drive/v3/changes/startPageToken")?;
                let start: WireStartToken = self.get_json(url).await?;
                start.start_page_token
            }
        };

        let mut url = Self::endpoint(&self.drive_base, "drive/v3/changes")?;
        url.query_pairs_mut().append_pair("pageToken", &token);
        let list: WireChangeList = self.get_json(url).await?;

        cursor.page_token = list
            .new_start_page_token
            .or(list.next_page_token)
            .or(Some(token));
        Ok(list.changes.into_iter().filter_map(|c| c.file_id).collect())
    }
}

// Provider wire format.

#[derive(Debug, Deserialize)]
struct WireForm {
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireItem {
    item_id: String,
    #[serde(default)]
    title: String,
    description: Option<String>,
    question_item: Option<WireQuestionItem>,
    image_item: Option<WireImageItem>,
    video_item: Option<WireVideoItem>,
    text_item: Option<serde_json::Value>,
    page_break_item: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireQuestionItem {
    question: WireQuestion,
    image: Option<WireImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuestion {
    #[serde(default)]
    required: bool,
    grading: Option<WireGrading>,
    choice_question: Option<WireChoiceQuestion>,
    text_question: Option<WireTextQuestion>,
    scale_question: Option<WireScaleQuestion>,
    date_question: Option<serde_json::Value>,
    time_question: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGrading {
    #[serde(default)]
    point_value: i64,
    correct_answers: Option<WireCorrectAnswers>,
}

#[derive(Debug, Deserialize)]
struct WireCorrectAnswers {
    #[serde(default)]
    answers: Vec<WireAnswer>,
}

#[derive(Debug, Deserialize)]
struct WireAnswer {
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireChoiceQuestion {
    #[serde(rename = "type")]
    choice_type: String,
    #[serde(default)]
    options: Vec<WireOption>,
}

#[derive(Debug, Deserialize)]
struct WireOption {
    #[serde(default)]
    value: String,
    image: Option<WireImage>,
}

#[derive(Debug, Deserialize)]
struct WireTextQuestion {
    #[serde(default)]
    paragraph: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireScaleQuestion {
    #[serde(default)]
    low: i64,
    high: i64,
    low_label: Option<String>,
    high_label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireImage {
    content_uri: Option<String>,
    alt_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireImageItem {
    image: WireImage,
}

#[derive(Debug, Deserialize)]
struct WireVideoItem {
    video: WireVideo,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVideo {
    youtube_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStartToken {
    start_page_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChangeList {
    #[serde(default)]
    changes: Vec<WireChange>,
    new_start_page_token: Option<String>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChange {
    file_id: Option<String>,
}

impl WireImage {
    fn into_media(self) -> Option<Media> {
        self.content_uri.map(|uri| Media::Remote {
            uri,
            alt_text: self.alt_text,
        })
    }
}

impl WireQuestion {
    fn kind(&mut self) -> Option<QuestionKind> {
        if let Some(choice) = self.choice_question.take() {
            let choice_type = match choice.choice_type.as_str() {
                "RADIO" => ChoiceType::Radio,
                "CHECKBOX" => ChoiceType::Checkbox,
                "DROP_DOWN" => ChoiceType::DropDown,
                _ => return None,
            };
            let options = choice
                .options
                .into_iter()
                .map(|o| ChoiceOption {
                    value: o.value,
                    image: o.image.and_then(WireImage::into_media),
                })
                .collect();
            return Some(QuestionKind::Choice {
                choice_type,
                options,
            });
        }
        if let Some(text) = self.text_question.take() {
            return Some(QuestionKind::Text {
                paragraph: text.paragraph,
            });
        }
        if let Some(scale) = self.scale_question.take() {
            return Some(QuestionKind::Scale {
                low: scale.low,
                high: scale.high,
                low_label: scale.low_label,
                high_label: scale.high_label,
            });
        }
        if self.date_question.is_some() {
            return Some(QuestionKind::Date);
        }
        if self.time_question.is_some() {
            return Some(QuestionKind::Time);
        }
        None
    }

    fn grading(&mut self) -> Option<Grading> {
        self.grading.take().map(|g| Grading {
            point_value: g.point_value,
            correct_answers: g
                .correct_answers
                .map(|c| c.answers.into_iter().map(|a| a.value).collect())
                .unwrap_or_default(),
        })
    }
}

impl WireItem {
    fn into_item(self) -> Option<FormItem> {
        let WireItem {
            item_id,
            title,
            description,
            question_item,
            image_item,
            video_item,
            text_item,
            page_break_item,
        } = self;

        if let Some(q) = question_item {
            let mut question = q.question;
            let kind = question.kind()?;
            return Some(FormItem::Question(QuestionItem {
                item_id,
                title,
                description,
                required: question.required,
                question: kind,
                image: q.image.and_then(WireImage::into_media),
                grading: question.grading(),
            }));
        }
        if let Some(image) = image_item {
            return Some(FormItem::Image(ImageItem {
                item_id,
                title,
                description,
                image: image.image.into_media()?,
            }));
        }
        if let Some(video) = video_item {
            return Some(FormItem::Video(VideoItem {
                item_id,
                title,
                description,
                youtube_uri: video.video.youtube_uri,
                caption: video.caption,
            }));
        }
        if text_item.is_some() {
            return Some(FormItem::Text(TextItem {
                item_id,
                title,
                description,
            }));
        }
        if page_break_item.is_some() {
            return Some(FormItem::PageBreak(PageBreakItem {
                item_id,
                title,
                description,
            }));
        }
        None
    }
}
