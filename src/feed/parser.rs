use chrono::{DateTime, Utc};
use feed_rs::model::{self, Entry};
use feed_rs::parser;
use thiserror::Error;
use url::Url;

use crate::model::{Attachment, Category, Feed, Guid, Image, News, Person};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to parse feed: {0}")]
    Syntax(#[from] parser::ParseFeedError),
}

/// Parses RSS/Atom `bytes` into a transient feed stored under `link`.
///
/// Every entry becomes a NEW news item received at `received`. Links that are
/// not absolute URLs are dropped, relative ones resolved against the entry's
/// base URI when it has one. Entries without an id of their own get no GUID,
/// so they are matched against stored items by link.
pub fn parse_feed(link: &Url, bytes: &[u8], received: DateTime<Utc>) -> Result<Feed, ParseError> {
    // feed-rs would otherwise hash link and title into a synthetic id.
    let parsed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)?;

    let mut feed = Feed::new(link.clone());
    feed.title = parsed.title.map(|t| t.content);
    feed.description = parsed.description.map(|d| d.content);
    feed.homepage = parsed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .and_then(|l| parse_url(&l.href, None));
    feed.language = parsed.language;
    feed.copyright = parsed.rights.map(|r| r.content);
    feed.image = parsed.logo.and_then(convert_image);
    feed.author = parsed.authors.into_iter().next().map(convert_person);
    feed.categories = parsed.categories.into_iter().map(convert_category).collect();
    feed.last_modified = parsed.updated;

    for entry in parsed.entries {
        let news = convert_entry(&feed.link, entry, received);
        feed.add_news(std::sync::Arc::new(news));
    }

    tracing::debug!(feed = %link, news = feed.news.len(), "Parsed feed");
    Ok(feed)
}

fn convert_entry(feed_link: &Url, entry: Entry, received: DateTime<Utc>) -> News {
    let news = News::new(feed_link.clone(), received);
    let base = entry.base.as_deref().and_then(|b| parse_url(b, None));

    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .and_then(|l| parse_url(&l.href, base.as_ref()));

    let guid = entry.id.trim();
    if !guid.is_empty() {
        let permalink = link.as_ref().is_some_and(|l| l.as_str() == guid);
        news.set_guid(Some(Guid::new(guid, permalink)));
    }

    let description = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content));

    news.set_title(entry.title.map(|t| t.content));
    news.set_link(link);
    news.set_base_uri(base.clone());
    news.set_description(description);
    news.set_publish_date(entry.published);
    news.set_modified_date(entry.updated);
    news.set_author(entry.authors.into_iter().next().map(convert_person));

    for category in entry.categories {
        news.add_category(convert_category(category));
    }

    let mut attachments: Vec<Attachment> = Vec::new();
    for enclosure in entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
    {
        if let Some(url) = parse_url(&enclosure.href, base.as_ref()) {
            let mut attachment = Attachment::new(url);
            attachment.mime_type = enclosure.media_type.clone();
            attachment.length = enclosure.length;
            attachments.push(attachment);
        }
    }
    for content in entry.media.iter().flat_map(|m| m.content.iter()) {
        let Some(url) = content.url.as_ref().and_then(|u| parse_url(u.as_str(), None)) else {
            continue;
        };
        if attachments.iter().any(|a| a.link == url) {
            continue;
        }
        let mut attachment = Attachment::new(url);
        attachment.mime_type = content.content_type.as_ref().map(|m| m.to_string());
        attachment.length = content.size;
        attachments.push(attachment);
    }
    for attachment in attachments {
        news.add_attachment(attachment);
    }

    news
}

fn convert_person(person: model::Person) -> Person {
    let mut converted = Person::named(person.name);
    converted.uri = person.uri.as_deref().and_then(|u| parse_url(u, None));
    converted.email = person.email;
    converted
}

fn convert_category(category: model::Category) -> Category {
    let mut converted = Category::new(category.label.unwrap_or(category.term));
    converted.domain = category.scheme;
    converted
}

fn convert_image(image: model::Image) -> Option<Image> {
    Some(Image {
        url: parse_url(&image.uri, None)?,
        title: image.title,
        link: image.link.and_then(|l| parse_url(&l.href, None)),
    })
}

fn parse_url(href: &str, base: Option<&Url>) -> Option<Url> {
    let href = href.trim();
    match base {
        Some(base) => base.join(href).ok(),
        None => Url::parse(href).ok(),
    }
}
