use std::path::PathBuf;

const BEAR_CONTAINER: &str =
    "Library/Group Containers/9K33E3U3T4.net.shinyfrog.bear/Application Data";

pub struct DataPaths {
    pub database: PathBuf,
    pub index: PathBuf,
}

impl DataPaths {
    pub fn new() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_home(home)
    }

    pub fn from_home(home: PathBuf) -> Self {
        Self {
            database: home.join(BEAR_CONTAINER).join("database.sqlite"),
            index: home.join(".bear-search").join("index.sqlite"),
        }
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new()
    }
}
