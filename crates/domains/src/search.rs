//! # Search options and filters
//!
//! Each listing accepts a closed set of search options. Raw option codes from
//! a form are parsed totally: anything unrecognised (including an empty code)
//! falls back to `All`.
//!
//! A filter value is handed unchanged to both the listing and the count call
//! of a store, so the two can never disagree about which rows match.

use serde::{Deserialize, Serialize};

use crate::models::{Member, MemberId, Post};

/// Which listing a search targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Posts,
    Members,
}

/// Selectable option for a search form: wire code plus display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptionChoice {
    pub code: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSearchOption {
    ByContent,
    ByTitle,
    /// Owner nickname
    ByWriter,
    #[default]
    All,
}

impl PostSearchOption {
    pub fn code(self) -> &'static str {
        match self {
            PostSearchOption::ByContent => "C",
            PostSearchOption::ByTitle => "T",
            PostSearchOption::ByWriter => "W",
            PostSearchOption::All => "",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PostSearchOption::ByContent => "Content",
            PostSearchOption::ByTitle => "Title",
            PostSearchOption::ByWriter => "Writer",
            PostSearchOption::All => "All",
        }
    }

    /// Options offered on the public and admin post listings.
    pub fn choices() -> Vec<OptionChoice> {
        [Self::ByContent, Self::ByTitle, Self::ByWriter]
            .into_iter()
            .map(Self::choice)
            .collect()
    }

    /// Options offered on a member's own post listing.
    pub fn owner_choices() -> Vec<OptionChoice> {
        [Self::ByContent, Self::ByTitle].into_iter().map(Self::choice).collect()
    }

    fn choice(self) -> OptionChoice {
        OptionChoice {
            code: self.code(),
            label: self.label(),
        }
    }
}

impl From<&str> for PostSearchOption {
    fn from(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "C" => PostSearchOption::ByContent,
            "T" => PostSearchOption::ByTitle,
            "W" => PostSearchOption::ByWriter,
            _ => PostSearchOption::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberSearchOption {
    ByLoginId,
    ByUsername,
    ByNickname,
    #[default]
    All,
}

impl MemberSearchOption {
    pub fn code(self) -> &'static str {
        match self {
            MemberSearchOption::ByLoginId => "I",
            MemberSearchOption::ByUsername => "U",
            MemberSearchOption::ByNickname => "N",
            MemberSearchOption::All => "",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MemberSearchOption::ByLoginId => "Login ID",
            MemberSearchOption::ByUsername => "Name",
            MemberSearchOption::ByNickname => "Nickname",
            MemberSearchOption::All => "All",
        }
    }

    pub fn choices() -> Vec<OptionChoice> {
        [Self::ByLoginId, Self::ByUsername, Self::ByNickname]
            .into_iter()
            .map(|o| OptionChoice {
                code: o.code(),
                label: o.label(),
            })
            .collect()
    }
}

impl From<&str> for MemberSearchOption {
    fn from(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "I" => MemberSearchOption::ByLoginId,
            "U" => MemberSearchOption::ByUsername,
            "N" => MemberSearchOption::ByNickname,
            _ => MemberSearchOption::All,
        }
    }
}

/// Literal, case-sensitive, both-sides substring match.
fn contains(haystack: &str, keyword: &str) -> bool {
    haystack.contains(keyword)
}

/// Row filter for post listings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostFilter {
    pub option: PostSearchOption,
    pub keyword: String,
    /// Restricts the listing to one member's posts ("my posts")
    pub owner: Option<MemberId>,
}

impl PostFilter {
    pub fn new(option: PostSearchOption, keyword: impl Into<String>) -> Self {
        Self {
            option,
            keyword: keyword.into(),
            owner: None,
        }
    }

    pub fn owned_by(mut self, owner: MemberId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// The option actually applied. An owner-scoped listing offers only
    /// [`PostSearchOption::owner_choices`], so `ByWriter` there searches `All`.
    pub fn effective_option(&self) -> PostSearchOption {
        match (self.option, self.owner) {
            (PostSearchOption::ByWriter, Some(_)) => PostSearchOption::All,
            (option, _) => option,
        }
    }

    /// The keyword is ignored by `All` and when empty.
    pub fn keyword_applies(&self) -> bool {
        self.effective_option() != PostSearchOption::All && !self.keyword.is_empty()
    }

    /// The predicate every store must implement for this filter.
    pub fn matches(&self, post: &Post, owner_nickname: &str) -> bool {
        if self.owner.is_some_and(|owner| owner != post.owner_id) {
            return false;
        }
        if !self.keyword_applies() {
            return true;
        }
        match self.effective_option() {
            PostSearchOption::ByContent => contains(&post.content, &self.keyword),
            PostSearchOption::ByTitle => contains(&post.title, &self.keyword),
            PostSearchOption::ByWriter => contains(owner_nickname, &self.keyword),
            PostSearchOption::All => true,
        }
    }
}

/// Row filter for the member listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberFilter {
    pub option: MemberSearchOption,
    pub keyword: String,
}

impl MemberFilter {
    pub fn new(option: MemberSearchOption, keyword: impl Into<String>) -> Self {
        Self {
            option,
            keyword: keyword.into(),
        }
    }

    pub fn keyword_applies(&self) -> bool {
        self.option != MemberSearchOption::All && !self.keyword.is_empty()
    }

    pub fn matches(&self, member: &Member) -> bool {
        if !self.keyword_applies() {
            return true;
        }
        match self.option {
            MemberSearchOption::ByLoginId => contains(&member.login_id, &self.keyword),
            MemberSearchOption::ByUsername => contains(&member.username, &self.keyword),
            MemberSearchOption::ByNickname => contains(&member.nickname, &self.keyword),
            MemberSearchOption::All => true,
        }
    }
}
