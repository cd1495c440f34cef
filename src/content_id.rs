//! Composite item identifiers.
//!
//! Jellyfin clients only know flat, opaque item ids. Anilibria content lives
//! in a three level hierarchy (title, release/season, episode), so every id we
//! hand out is the three parts joined by [`DELIMITER`]. Parsing is total: any
//! string a client sends back degrades to absent parts instead of failing.

use std::fmt;

pub const DELIMITER: char = '-';

/// Series id reserved for collections manufactured by the shim itself.
pub const SYSTEM_SERIES: &str = "system";
pub const UPDATES: &str = "updates";
pub const FAVORITES: &str = "favorites";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContentId {
    pub series_id: Option<String>,
    pub season_id: Option<String>,
    pub episode_id: Option<String>,
}

/// What a [`ContentId`] points at. Produced once by [`ContentId::classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Root,
    Collection(String),
    Series,
    Season,
    Episode,
}

impl ContentId {
    pub fn new(
        series_id: Option<String>,
        season_id: Option<String>,
        episode_id: Option<String>,
    ) -> Self {
        Self {
            series_id: non_empty(series_id),
            season_id: non_empty(season_id),
            episode_id: non_empty(episode_id),
        }
    }

    pub fn series(series_id: impl Into<String>) -> Self {
        Self::new(Some(series_id.into()), None, None)
    }

    pub fn season(series_id: impl Into<String>, season_id: impl Into<String>) -> Self {
        Self::new(Some(series_id.into()), Some(season_id.into()), None)
    }

    pub fn episode(
        series_id: impl Into<String>,
        season_id: impl Into<String>,
        episode_id: impl Into<String>,
    ) -> Self {
        Self::new(
            Some(series_id.into()),
            Some(season_id.into()),
            Some(episode_id.into()),
        )
    }

    pub fn root() -> Self {
        Self::default()
    }

    /// Identifier of one of the top-level collections (`updates`,
    /// `favorites`) that have no upstream counterpart.
    pub fn synthetic_root(name: impl Into<String>) -> Self {
        Self::new(Some(SYSTEM_SERIES.to_owned()), Some(name.into()), None)
    }

    /// Splits `token` on the delimiter. Extra segments are ignored and empty
    /// segments become `None`.
    pub fn parse(token: &str) -> Self {
        let mut parts = token.split(DELIMITER).map(|part| part.to_owned());
        let series_id = parts.next();
        let season_id = parts.next();
        let episode_id = parts.next();
        Self::new(series_id, season_id, episode_id)
    }

    /// Joins the first `depth` parts (clamped to 1..=3). Absent parts are
    /// written as empty strings so positions stay stable.
    pub fn serialize(&self, depth: usize) -> String {
        let parts = [&self.series_id, &self.season_id, &self.episode_id];
        parts
            .iter()
            .take(depth.clamp(1, 3))
            .map(|part| part.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(&DELIMITER.to_string())
    }

    pub fn classify(&self) -> ContentKind {
        // The sentinel has to win over the shape checks below, otherwise
        // `system-updates` would classify as a season.
        if self.series_id.as_deref() == Some(SYSTEM_SERIES) {
            return ContentKind::Collection(self.season_id.clone().unwrap_or_default());
        }
        if self.episode_id.is_some() {
            return ContentKind::Episode;
        }
        if self.season_id.is_some() {
            return ContentKind::Season;
        }
        if self.series_id.is_some() {
            return ContentKind::Series;
        }
        ContentKind::Root
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize(3))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inverts_serialize_at_every_depth() {
        let ids = [
            ContentId::series("9000"),
            ContentId::season("9000", "1"),
            ContentId::episode("9000", "1", "12"),
            ContentId::synthetic_root(UPDATES),
            ContentId::root(),
        ];
        for id in ids {
            assert_eq!(ContentId::parse(&id.serialize(3)), id);
            assert_eq!(ContentId::parse(&id.serialize(2)).season_id, id.season_id);
            assert_eq!(
                ContentId::parse(&id.serialize(1)),
                ContentId::new(id.series_id.clone(), None, None)
            );
        }
    }

    #[test]
    fn serialize_keeps_empty_positions() {
        let id = ContentId::new(Some("42".into()), None, Some("3".into()));
        assert_eq!(id.to_string(), "42--3");
        assert_eq!(ContentId::series("42").to_string(), "42--");
        assert_eq!(ContentId::series("42").serialize(1), "42");
        assert_eq!(ContentId::season("42", "1").serialize(2), "42-1");
    }

    #[test]
    fn parse_is_total_on_arbitrary_input() {
        assert_eq!(ContentId::parse(""), ContentId::root());
        assert_eq!(ContentId::parse("---"), ContentId::root());

        let extra = ContentId::parse("1-2-3-4-5");
        assert_eq!(extra, ContentId::episode("1", "2", "3"));

        let gap = ContentId::parse("-7");
        assert_eq!(gap.series_id, None);
        assert_eq!(gap.season_id.as_deref(), Some("7"));

        let unicode = ContentId::parse("Обновления");
        assert_eq!(unicode.series_id.as_deref(), Some("Обновления"));
    }

    #[test]
    fn classify_follows_precedence() {
        assert_eq!(ContentId::root().classify(), ContentKind::Root);
        assert_eq!(ContentId::series("1").classify(), ContentKind::Series);
        assert_eq!(ContentId::season("1", "1").classify(), ContentKind::Season);
        assert_eq!(
            ContentId::episode("1", "1", "2").classify(),
            ContentKind::Episode
        );
    }

    #[test]
    fn synthetic_roots_never_collide_with_series() {
        assert_eq!(
            ContentId::synthetic_root(UPDATES).classify(),
            ContentKind::Collection(UPDATES.into())
        );
        assert_eq!(
            ContentId::synthetic_root(FAVORITES).classify(),
            ContentKind::Collection(FAVORITES.into())
        );
        assert_eq!(ContentId::series(UPDATES).classify(), ContentKind::Series);
        assert_eq!(
            ContentId::parse("system-favorites-9").classify(),
            ContentKind::Collection(FAVORITES.into())
        );
    }
}
