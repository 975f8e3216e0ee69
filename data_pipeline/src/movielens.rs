use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{PipelineErr, Result};

/// The MovieLens releases the pipeline knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Ml1m,
    Ml20m,
}

/// A single raw rating, ids are the ones found in the dataset files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rating {
    pub user: u32,
    pub item: u32,
    pub timestamp: u64,
}

impl Dataset {
    pub fn name(self) -> &'static str {
        match self {
            Self::Ml1m => "ml-1m",
            Self::Ml20m => "ml-20m",
        }
    }

    /// Users left after preprocessing.
    pub fn num_users(self) -> usize {
        match self {
            Self::Ml1m => 6040,
            Self::Ml20m => 138493,
        }
    }

    /// Items left after preprocessing.
    pub fn num_items(self) -> usize {
        match self {
            Self::Ml1m => 3706,
            Self::Ml20m => 26744,
        }
    }

    pub fn url(self) -> &'static str {
        match self {
            Self::Ml1m => "http://files.grouplens.org/datasets/movielens/ml-1m.zip",
            Self::Ml20m => "http://files.grouplens.org/datasets/movielens/ml-20m.zip",
        }
    }

    fn ratings_file(self) -> &'static str {
        match self {
            Self::Ml1m => "ratings.dat",
            Self::Ml20m => "ratings.csv",
        }
    }

    /// The directory holding this dataset's extracted files.
    pub fn dir(self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.name())
    }

    pub fn ratings_path(self, data_dir: &Path) -> PathBuf {
        self.dir(data_dir).join(self.ratings_file())
    }

    /// Checks the extracted ratings file is in place.
    ///
    /// # Returns
    /// The path to the ratings file, or a `MissingDataset` error which names the download url
    /// when `download_if_missing` is set.
    pub fn verify(self, data_dir: &Path, download_if_missing: bool) -> Result<PathBuf> {
        let path = self.ratings_path(data_dir);
        if path.is_file() {
            return Ok(path);
        }

        Err(PipelineErr::MissingDataset {
            path,
            url: download_if_missing.then(|| self.url()),
        })
    }

    /// Reads every rating of the dataset's ratings file.
    pub fn read_ratings(self, path: &Path) -> Result<Vec<Rating>> {
        let reader = BufReader::new(File::open(path)?);
        let (separator, skip) = match self {
            Self::Ml1m => ("::", 0),
            Self::Ml20m => (",", 1),
        };

        let mut ratings = Vec::new();
        for (i, line) in reader.lines().enumerate().skip(skip) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let rating = parse_rating(&line, separator).map_err(|detail| PipelineErr::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                detail,
            })?;

            ratings.push(rating);
        }

        log::info!(dataset = self.name(), ratings = ratings.len(); "ratings loaded");
        Ok(ratings)
    }
}

fn parse_rating(line: &str, separator: &str) -> std::result::Result<Rating, String> {
    let mut fields = line.trim().split(separator);
    let mut next = |what: &str| {
        fields
            .next()
            .map(str::trim)
            .ok_or_else(|| format!("missing {what}"))
    };

    let user = next("user id")?;
    let item = next("item id")?;
    let _rating = next("rating")?;
    let timestamp = next("timestamp")?;

    Ok(Rating {
        user: user.parse().map_err(|_| format!("bad user id {user:?}"))?,
        item: item.parse().map_err(|_| format!("bad item id {item:?}"))?,
        timestamp: timestamp
            .parse()
            .map_err(|_| format!("bad timestamp {timestamp:?}"))?,
    })
}

impl FromStr for Dataset {
    type Err = PipelineErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ml-1m" => Ok(Self::Ml1m),
            "ml-20m" => Ok(Self::Ml20m),
            other => Err(PipelineErr::UnknownDataset(other.to_string())),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
