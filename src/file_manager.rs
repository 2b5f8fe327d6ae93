use std::{
    collections::HashMap,
    fmt::Display,
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    error::{DbError, Result},
    page::Page,
};

/// The block id container that contains a specific block number for a specific file
#[derive(Debug, Eq, PartialEq, Clone, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub filename: String,
    pub block_num: usize,
}

impl BlockId {
    /// Block number of the synthetic block that guards a file's size
    pub const END_OF_FILE: usize = usize::MAX;

    pub fn new(filename: &str, block_num: usize) -> Self {
        Self {
            filename: filename.to_string(),
            block_num,
        }
    }

    /// The lock target readers of a file's length and its extenders agree on.
    /// It never refers to real data and is never pinned.
    pub fn end_of_file(filename: &str) -> Self {
        Self::new(filename, Self::END_OF_FILE)
    }

    pub fn is_end_of_file(&self) -> bool {
        self.block_num == Self::END_OF_FILE
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_end_of_file() {
            write!(f, "[file {}, block -1]", self.filename)
        } else {
            write!(f, "[file {}, block {}]", self.filename, self.block_num)
        }
    }
}

/// The file manager struct that manages the files in the database.
///
/// Every public operation takes the single internal mutex, so raw I/O is
/// linearizable from the point of view of the layers above.
pub struct FileManager {
    db_directory: PathBuf,
    block_size: usize,
    is_new: bool,
    open_files: Mutex<HashMap<String, File>>,
}

impl FileManager {
    pub fn new<P>(db_directory: P, block_size: usize) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        if block_size == 0 {
            return Err(DbError::InvalidArgument(
                "block size must be positive".to_string(),
            ));
        }
        let db_path = db_directory.as_ref().to_path_buf();
        let is_new = !db_path.exists() || fs::read_dir(&db_path)?.next().is_none();
        fs::create_dir_all(&db_path)?;

        //  temporary tables never survive a restart
        for entry in fs::read_dir(&db_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && entry.file_name().to_string_lossy().starts_with("temp")
            {
                debug!("removing leftover temporary file {:?}", entry.path());
                fs::remove_file(entry.path())?;
            }
        }
        info!(
            "file manager opened {:?} (new: {}, block size: {})",
            db_path, is_new, block_size
        );

        Ok(Self {
            db_directory: db_path,
            block_size,
            is_new,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the database directory was empty or missing when this manager was created
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn db_directory(&self) -> &Path {
        &self.db_directory
    }

    /// Allocate a fresh zeroed page of the block size
    pub fn create_page(&self) -> Page {
        Page::new(self.block_size)
    }

    /// Get the length of the file in blocks
    pub fn length(&self, filename: &str) -> Result<usize> {
        let mut open_files = self.open_files.lock();
        let file = self.get_file(&mut open_files, filename)?;
        let len = file.metadata()?.len() as usize;
        Ok(len / self.block_size)
    }

    /// Read the block provided by the block_id into the provided page.
    /// Bytes past the end of the file read as zero.
    pub fn read(&self, block_id: &BlockId, page: &mut Page) -> Result<()> {
        self.check_block(block_id, page)?;
        let mut open_files = self.open_files.lock();
        let file = self.get_file(&mut open_files, &block_id.filename)?;
        file.seek(SeekFrom::Start(self.offset_of(block_id)))?;

        let contents = page.contents_mut();
        let mut filled = 0;
        while filled < contents.len() {
            let n = file.read(&mut contents[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        contents[filled..].fill(0);
        Ok(())
    }

    /// Write the page to the block provided by the block_id
    pub fn write(&self, block_id: &BlockId, page: &Page) -> Result<()> {
        self.check_block(block_id, page)?;
        let mut open_files = self.open_files.lock();
        let file = self.get_file(&mut open_files, &block_id.filename)?;
        file.seek(SeekFrom::Start(self.offset_of(block_id)))?;
        file.write_all(page.contents())?;
        file.sync_data()?;
        Ok(())
    }

    /// Append a new, empty block to the file and return its id
    pub fn append(&self, filename: &str) -> Result<BlockId> {
        let mut open_files = self.open_files.lock();
        let file = self.get_file(&mut open_files, filename)?;
        let new_block_num = file.metadata()?.len() as usize / self.block_size;
        let block_id = BlockId::new(filename, new_block_num);
        file.seek(SeekFrom::Start(self.offset_of(&block_id)))?;
        file.write_all(&vec![0; self.block_size])?;
        file.sync_data()?;
        Ok(block_id)
    }

    fn offset_of(&self, block_id: &BlockId) -> u64 {
        (block_id.block_num * self.block_size) as u64
    }

    fn check_block(&self, block_id: &BlockId, page: &Page) -> Result<()> {
        if block_id.is_end_of_file() {
            return Err(DbError::InvalidArgument(format!(
                "{block_id} does not address data"
            )));
        }
        if page.size() != self.block_size {
            return Err(DbError::InvalidArgument(format!(
                "page of {} bytes does not match block size {}",
                page.size(),
                self.block_size
            )));
        }
        Ok(())
    }

    /// Get the file handle for the file with the given filename, opening it on first use
    fn get_file<'a>(
        &self,
        open_files: &'a mut HashMap<String, File>,
        filename: &str,
    ) -> Result<&'a mut File> {
        if filename.is_empty() {
            return Err(DbError::InvalidArgument(
                "file name must not be empty".to_string(),
            ));
        }
        if !open_files.contains_key(filename) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.db_directory.join(filename))?;
            open_files.insert(filename.to_string(), file);
        }
        open_files
            .get_mut(filename)
            .ok_or_else(|| DbError::InvalidArgument(format!("file {filename} is not open")))
    }
}
