use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of stations the player knows about.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StationId {
    #[default]
    Web3,
    Venus,
    IRadio,
    Female,
    Delta,
}

impl StationId {
    pub const ALL: [StationId; 5] = [
        StationId::Web3,
        StationId::Venus,
        StationId::IRadio,
        StationId::Female,
        StationId::Delta,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            StationId::Web3 => "Web3 Radio",
            StationId::Venus => "Venus Radio",
            StationId::IRadio => "i-Radio",
            StationId::Female => "Female Radio",
            StationId::Delta => "Delta FM",
        }
    }

    pub fn default_stream_url(self) -> &'static str {
        match self {
            StationId::Web3 => "https://web3radio.cloud/stream",
            StationId::Venus => "https://stream.zeno.fm/3wiuocujuobtv",
            StationId::IRadio => {
                "https://n04.radiojar.com/4ywdgup3bnzuv?1744076195=&rj-tok=AAABlhMxTIcARnjabAV4uyOIpA&rj-ttl=5"
            }
            StationId::Female => "https://s1.cloudmu.id/listen/female_radio/radio.mp3",
            StationId::Delta => "https://s1.cloudmu.id/listen/delta_fm/radio.mp3",
        }
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    /// 1-based selector key, matching the order of [`StationId::ALL`].
    pub fn from_number(n: usize) -> Option<StationId> {
        n.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn next(self) -> StationId {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn previous(self) -> StationId {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Station {
    pub id: StationId,
    pub stream_url: String,
    pub now_playing_url: Option<String>,
}

/// Per-station overrides read from the config file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now_playing_url: Option<String>,
}

impl StationOverride {
    pub fn is_empty(&self) -> bool {
        self.stream_url.is_none() && self.now_playing_url.is_none()
    }
}

/// The `[stations.<id>]` tables of the config file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationOverrides {
    #[serde(default, skip_serializing_if = "StationOverride::is_empty")]
    pub web3: StationOverride,
    #[serde(default, skip_serializing_if = "StationOverride::is_empty")]
    pub venus: StationOverride,
    #[serde(default, skip_serializing_if = "StationOverride::is_empty")]
    pub iradio: StationOverride,
    #[serde(default, skip_serializing_if = "StationOverride::is_empty")]
    pub female: StationOverride,
    #[serde(default, skip_serializing_if = "StationOverride::is_empty")]
    pub delta: StationOverride,
}

impl StationOverrides {
    pub fn get(&self, id: StationId) -> &StationOverride {
        match id {
            StationId::Web3 => &self.web3,
            StationId::Venus => &self.venus,
            StationId::IRadio => &self.iradio,
            StationId::Female => &self.female,
            StationId::Delta => &self.delta,
        }
    }
}

/// Immutable `StationId -> Station` lookup, built once at startup.
#[derive(Clone, Debug)]
pub struct StationCatalog {
    stations: HashMap<StationId, Station>,
}

impl StationCatalog {
    pub fn new(overrides: &StationOverrides) -> Self {
        let stations = StationId::ALL
            .iter()
            .map(|&id| {
                let over = overrides.get(id);
                let stream_url = over
                    .stream_url
                    .clone()
                    .unwrap_or_else(|| id.default_stream_url().to_string());
                let now_playing_url = over.now_playing_url.clone();
                (
                    id,
                    Station {
                        id,
                        stream_url,
                        now_playing_url,
                    },
                )
            })
            .collect();
        Self { stations }
    }

    pub fn get(&self, id: StationId) -> &Station {
        // every id is inserted by `new`
        &self.stations[&id]
    }

    pub fn stream_url(&self, id: StationId) -> &str {
        &self.get(id).stream_url
    }

    pub fn display_name(&self, id: StationId) -> &'static str {
        id.display_name()
    }

    pub fn now_playing_url(&self, id: StationId) -> Option<&str> {
        self.get(id).now_playing_url.as_deref()
    }
}

impl Default for StationCatalog {
    fn default() -> Self {
        Self::new(&StationOverrides::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_covers_every_station() {
        let catalog = StationCatalog::default();
        for id in StationId::ALL {
            assert_eq!(catalog.stream_url(id), id.default_stream_url());
            assert!(catalog.now_playing_url(id).is_none());
        }
        assert_eq!(catalog.display_name(StationId::IRadio), "i-Radio");
        assert_eq!(catalog.display_name(StationId::Delta), "Delta FM");
    }

    #[test]
    fn overrides_replace_only_their_station() {
        let overrides = StationOverrides {
            venus: StationOverride {
                stream_url: Some("http://localhost:8000/venus".into()),
                now_playing_url: Some("http://localhost:8000/np".into()),
            },
            ..Default::default()
        };
        let catalog = StationCatalog::new(&overrides);
        assert_eq!(catalog.stream_url(StationId::Venus), "http://localhost:8000/venus");
        assert_eq!(
            catalog.now_playing_url(StationId::Venus),
            Some("http://localhost:8000/np")
        );
        assert_eq!(
            catalog.stream_url(StationId::Web3),
            "https://web3radio.cloud/stream"
        );
    }

    #[test]
    fn selector_numbers_and_cycling() {
        assert_eq!(StationId::from_number(1), Some(StationId::Web3));
        assert_eq!(StationId::from_number(5), Some(StationId::Delta));
        assert_eq!(StationId::from_number(0), None);
        assert_eq!(StationId::from_number(6), None);
        assert_eq!(StationId::Delta.next(), StationId::Web3);
        assert_eq!(StationId::Web3.previous(), StationId::Delta);
    }

    #[test]
    fn ids_serialize_lowercase() {
        let s = serde_json::to_string(&StationId::IRadio).unwrap();
        assert_eq!(s, "\"iradio\"");
        let id: StationId = serde_json::from_str("\"female\"").unwrap();
        assert_eq!(id, StationId::Female);
    }
}
