//! Favorite rules and the matcher that classifies channels against them.
//!
//! Patterns are compiled once per mutation of the favorite list and cached
//! alongside the list.  A favorite whose pattern is empty or fails to compile
//! never matches; compile failures are kept in `errors()` for display.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::channel::Channel;
use crate::error::FavoriteError;

/// Which channel fields a favorite pattern is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteTarget {
    #[serde(default)]
    pub name: bool,
    #[serde(default)]
    pub genre: bool,
    #[serde(default)]
    pub detail: bool,
    #[serde(default)]
    pub comment: bool,
    #[serde(default)]
    pub url: bool,
    #[serde(default)]
    pub tip: bool,
}

impl Default for FavoriteTarget {
    fn default() -> Self {
        Self {
            name: true,
            genre: false,
            detail: false,
            comment: false,
            url: false,
            tip: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub name: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub target: FavoriteTarget,
    /// Row background colour, hex without `#`.
    #[serde(default = "default_bg_color", rename = "bgColor")]
    pub bg_color: String,
    #[serde(default = "default_font_color", rename = "fontColor")]
    pub font_color: String,
    #[serde(default)]
    pub notify: bool,
}

impl Favorite {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            target: FavoriteTarget::default(),
            bg_color: default_bg_color(),
            font_color: default_font_color(),
            notify: false,
        }
    }
}

fn default_bg_color() -> String {
    "ffffff".to_string()
}

fn default_font_color() -> String {
    "000000".to_string()
}

/// Colours of the first favorite a channel matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteStyle {
    pub favorite_idx: usize,
    pub bg_color: String,
    pub font_color: String,
}

/// Ordered favorite list plus its compiled patterns.
#[derive(Debug, Clone, Default)]
pub struct FavoriteMatcher {
    favorites: Vec<Favorite>,
    /// Parallel to `favorites`; `None` for empty or invalid patterns.
    compiled: Vec<Option<Regex>>,
    errors: Vec<FavoriteError>,
}

impl FavoriteMatcher {
    pub fn new(favorites: Vec<Favorite>) -> Self {
        let mut matcher = Self {
            favorites,
            compiled: Vec::new(),
            errors: Vec::new(),
        };
        matcher.recompile();
        matcher
    }

    pub fn favorites(&self) -> &[Favorite] {
        &self.favorites
    }

    pub fn get(&self, index: usize) -> Option<&Favorite> {
        self.favorites.get(index)
    }

    pub fn len(&self) -> usize {
        self.favorites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.favorites.is_empty()
    }

    /// Pattern compile failures from the last mutation.
    pub fn errors(&self) -> &[FavoriteError] {
        &self.errors
    }

    /// Index of the first favorite, in list order, that matches `channel`.
    pub fn match_first(&self, channel: &Channel) -> Option<usize> {
        (0..self.favorites.len()).find(|&idx| self.matches(idx, channel))
    }

    /// Every favorite that matches `channel`.
    pub fn match_all(&self, channel: &Channel) -> BTreeSet<usize> {
        (0..self.favorites.len())
            .filter(|&idx| self.matches(idx, channel))
            .collect()
    }

    pub fn matches_any(&self, channel: &Channel) -> bool {
        self.match_first(channel).is_some()
    }

    pub fn style_for(&self, channel: &Channel) -> Option<FavoriteStyle> {
        let idx = self.match_first(channel)?;
        let favorite = &self.favorites[idx];
        Some(FavoriteStyle {
            favorite_idx: idx,
            bg_color: favorite.bg_color.clone(),
            font_color: favorite.font_color.clone(),
        })
    }

    fn matches(&self, idx: usize, channel: &Channel) -> bool {
        let (Some(favorite), Some(Some(re))) = (self.favorites.get(idx), self.compiled.get(idx))
        else {
            return false;
        };
        let target = &favorite.target;
        (target.name && re.is_match(&channel.name))
            || (target.genre && re.is_match(&channel.genre))
            || (target.detail && re.is_match(&channel.detail))
            || (target.comment && re.is_match(&channel.comment))
            || (target.url && re.is_match(&channel.url))
            || (target.tip && re.is_match(&channel.tip))
    }

    // ── mutation ──────────────────────────────────────────────────────────────

    pub fn set_favorites(&mut self, favorites: Vec<Favorite>) {
        self.favorites = favorites;
        self.recompile();
    }

    pub fn push(&mut self, favorite: Favorite) {
        self.favorites.push(favorite);
        self.recompile();
    }

    pub fn remove(&mut self, index: usize) -> Result<Favorite, FavoriteError> {
        if index >= self.favorites.len() {
            return Err(FavoriteError::OutOfRange(index));
        }
        let removed = self.favorites.remove(index);
        self.recompile();
        Ok(removed)
    }

    pub fn replace(&mut self, index: usize, favorite: Favorite) -> Result<(), FavoriteError> {
        let slot = self
            .favorites
            .get_mut(index)
            .ok_or(FavoriteError::OutOfRange(index))?;
        *slot = favorite;
        self.recompile();
        Ok(())
    }

    /// Swap with the previous entry.  Returns the new index.
    pub fn move_up(&mut self, index: usize) -> Result<usize, FavoriteError> {
        if index >= self.favorites.len() {
            return Err(FavoriteError::OutOfRange(index));
        }
        if index == 0 {
            return Ok(0);
        }
        self.favorites.swap(index, index - 1);
        self.recompile();
        Ok(index - 1)
    }

    /// Swap with the next entry.  Returns the new index.
    pub fn move_down(&mut self, index: usize) -> Result<usize, FavoriteError> {
        let len = self.favorites.len();
        if index >= len {
            return Err(FavoriteError::OutOfRange(index));
        }
        if index + 1 == len {
            return Ok(index);
        }
        self.favorites.swap(index, index + 1);
        self.recompile();
        Ok(index + 1)
    }

    /// Add a channel name to a favorite's pattern as an escaped alternative.
    pub fn register_channel(&mut self, index: usize, channel_name: &str) -> Result<(), FavoriteError> {
        let favorite = self
            .favorites
            .get_mut(index)
            .ok_or(FavoriteError::OutOfRange(index))?;
        if !favorite.pattern.is_empty() {
            favorite.pattern.push('|');
        }
        favorite.pattern.push_str(&regex::escape(channel_name));
        self.recompile();
        Ok(())
    }

    fn recompile(&mut self) {
        let mut errors = Vec::new();
        let compiled: Vec<Option<Regex>> = self
            .favorites
            .iter()
            .enumerate()
            .map(|(index, favorite)| {
                if favorite.pattern.is_empty() {
                    return None;
                }
                match RegexBuilder::new(&favorite.pattern)
                    .case_insensitive(true)
                    .build()
                {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(
                            "favorite #{} ({}) skipped, bad pattern {:?}: {}",
                            index, favorite.name, favorite.pattern, e
                        );
                        errors.push(FavoriteError::InvalidPattern {
                            index,
                            name: favorite.name.clone(),
                            message: e.to_string(),
                        });
                        None
                    }
                }
            })
            .collect();
        self.compiled = compiled;
        self.errors = errors;
    }
}
