use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::errors::{DbError, Result};

/// Column type, serialized by its integer code in the meta file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColType {
    Int,
    Float,
    Char,
}

impl ColType {
    pub fn code(self) -> i32 {
        match self {
            ColType::Int => 0,
            ColType::Float => 1,
            ColType::Char => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(ColType::Int),
            1 => Ok(ColType::Float),
            2 => Ok(ColType::Char),
            code => Err(DbError::Internal(format!("unknown column type code {}", code))),
        }
    }
}

impl Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColType::Int => "INT",
            ColType::Float => "FLOAT",
            ColType::Char => "CHAR",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ColType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" => Ok(ColType::Int),
            "float" => Ok(ColType::Float),
            "char" => Ok(ColType::Char),
            s => Err(DbError::Internal(format!("unknown column type {}", s))),
        }
    }
}

/// One column of a table: its byte span inside the fixed-size record and
/// whether some index covers it.
#[derive(Clone, Debug, PartialEq)]
pub struct ColMeta {
    pub tab_name: String,
    pub name: String,
    pub col_type: ColType,
    pub len: i32,
    pub offset: i32,
    pub index: bool,
}

impl Display for ColMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.tab_name,
            self.name,
            self.col_type.code(),
            self.len,
            self.offset,
            self.index as i32
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexMeta {
    pub tab_name: String,
    pub index_name: String,
    pub col_tot_len: i32,
    pub col_num: i32,
    pub cols: Vec<ColMeta>,
    pub offsets: Vec<i32>,
}

impl IndexMeta {
    pub fn new(tab_name: String, index_name: String, cols: Vec<ColMeta>) -> Self {
        let col_tot_len = cols.iter().map(|col| col.len).sum();
        let col_num = cols.len() as i32;
        let offsets = Self::offsets_of(&cols);
        Self {
            tab_name,
            index_name,
            col_tot_len,
            col_num,
            cols,
            offsets,
        }
    }

    fn offsets_of(cols: &[ColMeta]) -> Vec<i32> {
        let mut offsets = Vec::with_capacity(cols.len());
        let mut offset = 0;
        for col in cols {
            offsets.push(offset);
            offset += col.len;
        }
        offsets
    }

    pub fn col_names(&self) -> Vec<String> {
        self.cols.iter().map(|col| col.name.clone()).collect()
    }
}

impl Display for IndexMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.tab_name, self.index_name, self.col_tot_len, self.col_num
        )?;
        for col in &self.cols {
            write!(f, "\n{}", col)?;
        }
        Ok(())
    }
}

/// Table metadata: columns in declaration order and the indexes built on
/// them. Index names are derived from the covered column names and cached
/// per column list.
#[derive(Clone, Debug, Default)]
pub struct TabMeta {
    pub name: String,
    pub cols: Vec<ColMeta>,
    pub indexes: BTreeMap<String, IndexMeta>,
    index_name_cache: HashMap<Vec<String>, String>,
}

impl TabMeta {
    pub fn new(name: String, cols: Vec<ColMeta>) -> Self {
        Self {
            name,
            cols,
            indexes: BTreeMap::new(),
            index_name_cache: HashMap::new(),
        }
    }

    pub fn get_col(&self, col_name: &str) -> Result<&ColMeta> {
        self.cols
            .iter()
            .find(|col| col.name == col_name)
            .ok_or_else(|| DbError::ColumnNotFound(col_name.to_owned()))
    }

    pub fn get_col_mut(&mut self, col_name: &str) -> Result<&mut ColMeta> {
        self.cols
            .iter_mut()
            .find(|col| col.name == col_name)
            .ok_or_else(|| DbError::ColumnNotFound(col_name.to_owned()))
    }

    /// The deterministic index file name for this column list. Cached, the
    /// key being the ordered column names.
    pub fn get_index_name(&mut self, col_names: &[String]) -> String {
        if let Some(name) = self.index_name_cache.get(col_names) {
            return name.clone();
        }
        let name = crate::index::IndexManager::index_name(&self.name, col_names);
        self.index_name_cache
            .insert(col_names.to_vec(), name.clone());
        name
    }
}

impl PartialEq for TabMeta {
    fn eq(&self, other: &Self) -> bool {
        // the name cache is derived state and does not participate
        self.name == other.name && self.cols == other.cols && self.indexes == other.indexes
    }
}

impl Display for TabMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", self.cols.len())?;
        for col in &self.cols {
            writeln!(f, "{}", col)?;
        }
        writeln!(f, "{}", self.indexes.len())?;
        for (index_name, index) in &self.indexes {
            writeln!(f, "{}", index_name)?;
            writeln!(f, "{}", index)?;
        }
        Ok(())
    }
}

/// Database metadata, persisted as one whitespace-tokenized text file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DbMeta {
    pub name: String,
    pub tabs: BTreeMap<String, TabMeta>,
}

impl DbMeta {
    pub fn new(name: String) -> Self {
        Self {
            name,
            tabs: BTreeMap::new(),
        }
    }

    pub fn is_table(&self, tab_name: &str) -> bool {
        self.tabs.contains_key(tab_name)
    }

    pub fn get_table(&self, tab_name: &str) -> Result<&TabMeta> {
        self.tabs
            .get(tab_name)
            .ok_or_else(|| DbError::TableNotFound(tab_name.to_owned()))
    }

    pub fn get_table_mut(&mut self, tab_name: &str) -> Result<&mut TabMeta> {
        self.tabs
            .get_mut(tab_name)
            .ok_or_else(|| DbError::TableNotFound(tab_name.to_owned()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Tokens::new(text);
        let meta = Self::parse_tokens(&mut tokens)?;
        Ok(meta)
    }

    fn parse_tokens(tokens: &mut Tokens) -> Result<Self> {
        let name = tokens.next_token()?.to_owned();
        let n_tabs = tokens.next_usize()?;
        let mut tabs = BTreeMap::new();
        for _ in 0..n_tabs {
            let tab = parse_tab(tokens)?;
            tabs.insert(tab.name.clone(), tab);
        }
        Ok(Self { name, tabs })
    }
}

impl Display for DbMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", self.tabs.len())?;
        for tab in self.tabs.values() {
            writeln!(f, "{}", tab)?;
        }
        Ok(())
    }
}

fn parse_col(tokens: &mut Tokens) -> Result<ColMeta> {
    Ok(ColMeta {
        tab_name: tokens.next_token()?.to_owned(),
        name: tokens.next_token()?.to_owned(),
        col_type: ColType::from_code(tokens.next_i32()?)?,
        len: tokens.next_i32()?,
        offset: tokens.next_i32()?,
        index: tokens.next_i32()? != 0,
    })
}

fn parse_index(tokens: &mut Tokens) -> Result<IndexMeta> {
    let tab_name = tokens.next_token()?.to_owned();
    let index_name = tokens.next_token()?.to_owned();
    let col_tot_len = tokens.next_i32()?;
    let col_num = tokens.next_i32()?;
    let mut cols = Vec::with_capacity(col_num as usize);
    for _ in 0..col_num {
        cols.push(parse_col(tokens)?);
    }
    let offsets = IndexMeta::offsets_of(&cols);
    Ok(IndexMeta {
        tab_name,
        index_name,
        col_tot_len,
        col_num,
        cols,
        offsets,
    })
}

fn parse_tab(tokens: &mut Tokens) -> Result<TabMeta> {
    let name = tokens.next_token()?.to_owned();
    let n_cols = tokens.next_usize()?;
    let mut cols = Vec::with_capacity(n_cols);
    for _ in 0..n_cols {
        cols.push(parse_col(tokens)?);
    }
    let mut tab = TabMeta::new(name, cols);
    let n_indexes = tokens.next_usize()?;
    for _ in 0..n_indexes {
        let index_name = tokens.next_token()?.to_owned();
        let index = parse_index(tokens)?;
        tab.indexes.insert(index_name, index);
    }
    Ok(tab)
}

/// Whitespace-token cursor over the meta file contents.
struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.split_whitespace(),
        }
    }

    fn next_token(&mut self) -> Result<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| DbError::Internal("meta file ended unexpectedly".into()))
    }

    fn next_i32(&mut self) -> Result<i32> {
        let token = self.next_token()?;
        token
            .parse()
            .map_err(|_| DbError::Internal(format!("malformed meta token {}", token)))
    }

    fn next_usize(&mut self) -> Result<usize> {
        let token = self.next_token()?;
        token
            .parse()
            .map_err(|_| DbError::Internal(format!("malformed meta token {}", token)))
    }
}

#[cfg(test)]
mod tests {

    use super::{ColMeta, ColType, DbMeta, IndexMeta, TabMeta};

    fn sample_cols(tab: &str) -> Vec<ColMeta> {
        vec![
            ColMeta {
                tab_name: tab.to_owned(),
                name: "id".to_owned(),
                col_type: ColType::Int,
                len: 4,
                offset: 0,
                index: false,
            },
            ColMeta {
                tab_name: tab.to_owned(),
                name: "name".to_owned(),
                col_type: ColType::Char,
                len: 16,
                offset: 4,
                index: false,
            },
        ]
    }

    #[test]
    fn meta_round_trips_through_text() {
        let mut db = DbMeta::new("d".to_owned());
        let mut tab = TabMeta::new("t".to_owned(), sample_cols("t"));
        let index_cols = vec![tab.cols[0].clone()];
        let index_name = tab.get_index_name(&["id".to_owned()]);
        tab.indexes.insert(
            index_name.clone(),
            IndexMeta::new("t".to_owned(), index_name, index_cols),
        );
        tab.cols[0].index = true;
        db.tabs.insert("t".to_owned(), tab);
        db.tabs
            .insert("u".to_owned(), TabMeta::new("u".to_owned(), sample_cols("u")));

        let text = db.to_string();
        let parsed = DbMeta::parse(&text).unwrap();
        assert_eq!(parsed, db);
    }

    #[test]
    fn empty_meta_round_trips() {
        let db = DbMeta::new("empty".to_owned());
        let parsed = DbMeta::parse(&db.to_string()).unwrap();
        assert_eq!(parsed, db);
    }

    #[test]
    fn index_offsets_pack_in_declaration_order() {
        let index = IndexMeta::new(
            "t".to_owned(),
            "t_id_name.idx".to_owned(),
            sample_cols("t"),
        );
        assert_eq!(index.col_tot_len, 20);
        assert_eq!(index.col_num, 2);
        assert_eq!(index.offsets, vec![0, 4]);
    }

    #[test]
    fn index_name_cache_is_consistent() {
        let mut tab = TabMeta::new("t".to_owned(), sample_cols("t"));
        let cols = vec!["id".to_owned(), "name".to_owned()];
        let first = tab.get_index_name(&cols);
        assert_eq!(first, "t_id_name.idx");
        assert_eq!(tab.get_index_name(&cols), first);
        assert_eq!(tab.get_index_name(&cols[..1]), "t_id.idx");
    }

    #[test]
    fn col_type_codes_are_stable() {
        for col_type in [ColType::Int, ColType::Float, ColType::Char] {
            assert_eq!(ColType::from_code(col_type.code()).unwrap(), col_type);
        }
        assert!(ColType::from_code(9).is_err());
        assert_eq!("char".parse::<ColType>().unwrap(), ColType::Char);
        assert!("blob".parse::<ColType>().is_err());
    }
}
