use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Formatter};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::{debug, info, trace};
use smallvec::{smallvec, SmallVec};
use thiserror::Error;

/// The expected maximum number of distinct characters appearing in a word list.
pub const MAX_GLYPH_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given letter, based on its index in the WordList's `glyphs` field.
pub type GlyphId = usize;

/// An identifier for a given slot, based on its index in the GridConfig's `slot_configs` field.
pub type SlotId = usize;

/// An identifier for a given word, based on its index in the WordList's `words` field.
pub type WordId = usize;

/// Zero-indexed (row, column) coords for a cell in the grid, where row 0 is the top row.
pub type GridCoord = (usize, usize);

/// Everything that can go wrong while reading a grid or a word list.
#[derive(Error, Debug)]
pub enum CrosswordError {
    #[error("IO error, more details: {0}")]
    Io(#[from] std::io::Error),
    #[error("The grid template has no rows.")]
    EmptyTemplate,
    #[error("The grid has no slots to fill.")]
    EmptyGrid,
    #[error("The entry starting at {loc:?} has zero length.")]
    ZeroLengthEntry { loc: GridCoord },
    #[error("Entries {first} and {second} both run {direction:?} through cell {cell:?}.")]
    OverlappingEntries {
        first: usize,
        second: usize,
        direction: Direction,
        cell: GridCoord,
    },
}

pub type CrosswordResult<T> = Result<T, CrosswordError>;

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// A fillable slot in the grid. Two variables are the same slot iff their starting cell,
/// direction and length all match, so they can be used directly as map keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable {
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
    pub length: usize,
}

impl Variable {
    pub fn new(row: usize, col: usize, direction: Direction, length: usize) -> Variable {
        Variable { row, col, direction, length }
    }

    /// Generate the coords for each cell of this variable.
    pub fn cell_coords(&self) -> Vec<GridCoord> {
        (0..self.length).map(|cell_idx| {
            match self.direction {
                Direction::Across => (self.row, self.col + cell_idx),
                Direction::Down => (self.row + cell_idx, self.col),
            }
        }).collect()
    }
}

/// A struct representing a word that can be chosen for a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub string: String,
    pub glyphs: SmallVec<[GlyphId; MAX_SLOT_LENGTH]>,
}

/// The vocabulary every slot draws from. Words are trimmed, upper-cased and deduplicated, so two
/// slots hold the same word iff they hold the same `WordId`.
pub struct WordList {
    pub glyphs: SmallVec<[char; MAX_GLYPH_COUNT]>,
    pub words: Vec<Word>,
    word_ids_by_string: HashMap<String, WordId>,
}

impl Debug for WordList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordList")
            .field("glyphs", &self.glyphs)
            .field("words", &format!("({} entries)", self.words.len()))
            .finish()
    }
}

impl WordList {
    pub fn from_words<I, S>(words: I) -> WordList
        where
            I: IntoIterator<Item=S>,
            S: AsRef<str>,
    {
        let mut glyph_table: SmallVec<[char; MAX_GLYPH_COUNT]> = smallvec![];
        let mut glyph_ids_by_char: HashMap<char, GlyphId> = HashMap::new();
        let mut word_ids_by_string: HashMap<String, WordId> = HashMap::new();
        let mut result: Vec<Word> = vec![];

        for word in words {
            let string = word.as_ref().trim().to_uppercase();
            if string.is_empty() || word_ids_by_string.contains_key(&string) {
                continue;
            }

            let glyphs = string.chars().map(|c| {
                *glyph_ids_by_char.entry(c).or_insert_with(|| {
                    glyph_table.push(c);
                    glyph_table.len() - 1
                })
            }).collect();

            word_ids_by_string.insert(string.clone(), result.len());
            result.push(Word { string, glyphs });
        }

        WordList { glyphs: glyph_table, words: result, word_ids_by_string }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Look up a word by its text, using the same normalization as `from_words`.
    pub fn find(&self, word: &str) -> Option<WordId> {
        self.word_ids_by_string.get(&word.trim().to_uppercase()).cloned()
    }

    pub fn word(&self, word_id: WordId) -> &str {
        &self.words[word_id].string
    }
}

/// Read a word list with one word per line.
pub fn load_word_list<P: AsRef<Path>>(path: P) -> CrosswordResult<WordList> {
    let contents = fs::read_to_string(path)?;
    Ok(WordList::from_words(contents.lines()))
}

/// A struct representing a crossing between one slot and another, referencing the other slot's id
/// and the location of the intersection within the other slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub other_slot_id: SlotId,
    pub other_slot_cell: usize,
}

/// The pair of offsets at which two crossing slots must hold the same letter: the `cell`th letter
/// of the first slot's word has to equal the `other_cell`th letter of the second's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub cell: usize,
    pub other_cell: usize,
}

/// A struct representing the aspects of a slot in the grid that are static during filling.
#[derive(Debug)]
pub struct SlotConfig {
    pub id: SlotId,
    pub variable: Variable,
    pub crossings: SmallVec<[Option<Crossing>; MAX_SLOT_LENGTH]>,
}

/// The view of a grid that the solver needs: the slots, how they overlap, and who neighbors whom.
pub trait ConstraintGraph {
    fn slot_count(&self) -> usize;
    fn variable(&self, slot_id: SlotId) -> &Variable;
    fn overlap(&self, slot_id: SlotId, other_slot_id: SlotId) -> Option<Overlap>;
    fn neighbors(&self, slot_id: SlotId) -> &BitSet;
}

/// A struct representing the aspects of a grid that are static during filling.
#[derive(Debug)]
pub struct GridConfig {
    pub width: usize,
    pub height: usize,

    /// `structure[row][col]` is true for open cells and false for blocks.
    pub structure: Vec<Vec<bool>>,

    pub slot_configs: Vec<SlotConfig>,

    /// Derived from `crossings`, so it can never disagree with `overlap`.
    neighbors: Vec<BitSet>,
}

impl ConstraintGraph for GridConfig {
    fn slot_count(&self) -> usize {
        self.slot_configs.len()
    }

    fn variable(&self, slot_id: SlotId) -> &Variable {
        &self.slot_configs[slot_id].variable
    }

    fn overlap(&self, slot_id: SlotId, other_slot_id: SlotId) -> Option<Overlap> {
        self.slot_configs[slot_id].crossings.iter().enumerate().find_map(|(cell, crossing)| {
            match crossing {
                Some(crossing) if crossing.other_slot_id == other_slot_id => Some(Overlap {
                    cell,
                    other_cell: crossing.other_slot_cell,
                }),
                _ => None,
            }
        })
    }

    fn neighbors(&self, slot_id: SlotId) -> &BitSet {
        &self.neighbors[slot_id]
    }
}

/// An across or down entry in the input to `generate_grid_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridEntry {
    pub loc: GridCoord,
    pub len: usize,
    pub dir: Direction,
}

impl GridEntry {
    fn variable(&self) -> Variable {
        Variable::new(self.loc.0, self.loc.1, self.dir, self.len)
    }
}

/// Generate a GridConfig representing a grid with specified entries. Every cell covered by an
/// entry is open and everything else is a block.
pub fn generate_grid_config(entries: &[GridEntry]) -> CrosswordResult<GridConfig> {
    let cells: Vec<GridCoord> = entries.iter()
        .flat_map(|entry| entry.variable().cell_coords())
        .collect();

    let height = cells.iter().map(|&(row, _)| row + 1).max().unwrap_or(0);
    let width = cells.iter().map(|&(_, col)| col + 1).max().unwrap_or(0);

    let mut structure = vec![vec![false; width]; height];
    for (row, col) in cells {
        structure[row][col] = true;
    }

    build_grid_config(structure, entries)
}

fn build_grid_config(structure: Vec<Vec<bool>>, entries: &[GridEntry]) -> CrosswordResult<GridConfig> {
    if entries.is_empty() {
        return Err(CrosswordError::EmptyGrid);
    }

    // Build a map from cell location to entries involved, which we can then use to calculate
    // crossings. A cell can hold at most one across and one down entry.
    let mut entries_by_loc: HashMap<GridCoord, SmallVec<[(usize, usize); 2]>> = HashMap::new();

    for (entry_idx, entry) in entries.iter().enumerate() {
        if entry.len == 0 {
            return Err(CrosswordError::ZeroLengthEntry { loc: entry.loc });
        }

        for (cell_idx, loc) in entry.variable().cell_coords().into_iter().enumerate() {
            let cell_entries = entries_by_loc.entry(loc).or_default();

            if let Some(&(other_idx, _)) =
                cell_entries.iter().find(|&&(other_idx, _)| entries[other_idx].dir == entry.dir)
            {
                return Err(CrosswordError::OverlappingEntries {
                    first: other_idx,
                    second: entry_idx,
                    direction: entry.dir,
                    cell: loc,
                });
            }

            cell_entries.push((entry_idx, cell_idx));
        }
    }

    let slot_configs: Vec<SlotConfig> = entries.iter().enumerate().map(|(entry_idx, entry)| {
        let variable = entry.variable();

        let crossings = variable.cell_coords().iter().map(|loc| {
            entries_by_loc[loc].iter()
                .find(|&&(other_idx, _)| other_idx != entry_idx)
                .map(|&(other_slot_id, other_slot_cell)| Crossing { other_slot_id, other_slot_cell })
        }).collect();

        SlotConfig { id: entry_idx, variable, crossings }
    }).collect();

    let neighbors = slot_configs.iter().map(|slot_config| {
        slot_config.crossings.iter().flatten().map(|crossing| crossing.other_slot_id).collect()
    }).collect();

    Ok(GridConfig {
        width: structure.iter().map(|row| row.len()).max().unwrap_or(0),
        height: structure.len(),
        structure,
        slot_configs,
        neighbors,
    })
}

/// Generate a grid config from a string template, with `_` or `.` representing open cells and
/// anything else representing blocks. Every horizontal or vertical run of at least two open cells
/// becomes a slot. Short rows are padded with blocks.
///
/// Spaces are blocks like any other character, so rows inside the grid are never trimmed or
/// skipped. Only whitespace-only lines before the first row and after the last one are dropped,
/// along with whatever indentation all of the rows share.
pub fn generate_grid_config_from_template_string(template: &str) -> CrosswordResult<GridConfig> {
    let lines: Vec<&str> = template.lines().collect();
    let is_blank = |line: &&str| line.chars().all(char::is_whitespace);

    let first = match lines.iter().position(|line| !is_blank(line)) {
        Some(first) => first,
        None => return Err(CrosswordError::EmptyTemplate),
    };
    let last = lines.iter().rposition(|line| !is_blank(line)).unwrap_or(first);
    let lines = &lines[first..=last];

    let indent = lines.iter()
        .filter(|line| !is_blank(*line))
        .map(|line| line.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let rows: Vec<Vec<bool>> = lines.iter().map(|line| {
        line.chars().skip(indent).map(|c| c == '_' || c == '.').collect()
    }).collect();

    let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);
    let structure: Vec<Vec<bool>> = rows.into_iter().map(|mut row| {
        row.resize(width, false);
        row
    }).collect();
    let height = structure.len();

    // Collect the runs of open cells along a line, as (start index, length) pairs.
    fn build_runs(cells: impl Iterator<Item=bool>) -> Vec<(usize, usize)> {
        let mut result = vec![];
        let mut run_start: Option<usize> = None;

        for (idx, open) in cells.chain([false]).enumerate() {
            match (open, run_start) {
                (true, None) => run_start = Some(idx),
                (false, Some(start)) => {
                    if idx - start > 1 {
                        result.push((start, idx - start));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }

        result
    }

    let mut entries: Vec<GridEntry> = vec![];

    for (row, cells) in structure.iter().enumerate() {
        for (col, len) in build_runs(cells.iter().cloned()) {
            entries.push(GridEntry { loc: (row, col), len, dir: Direction::Across });
        }
    }

    for col in 0..width {
        for (row, len) in build_runs((0..height).map(|row| structure[row][col])) {
            entries.push(GridEntry { loc: (row, col), len, dir: Direction::Down });
        }
    }

    build_grid_config(structure, &entries)
}

/// Read a grid template from a file; see `generate_grid_config_from_template_string`.
pub fn load_grid_config<P: AsRef<Path>>(path: P) -> CrosswordResult<GridConfig> {
    let template = fs::read_to_string(path)?;
    generate_grid_config_from_template_string(&template)
}

/// The words still considered legal for each slot. Domains only ever shrink, and each slot's
/// options stay in ascending `WordId` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domains {
    options_by_slot: Vec<Vec<WordId>>,
}

impl Domains {
    /// Every slot starts out with the whole word list.
    pub fn new(slot_count: usize, words: &WordList) -> Domains {
        Domains {
            options_by_slot: (0..slot_count).map(|_| (0..words.len()).collect()).collect(),
        }
    }

    pub fn options(&self, slot_id: SlotId) -> &[WordId] {
        &self.options_by_slot[slot_id]
    }

    pub fn len(&self, slot_id: SlotId) -> usize {
        self.options_by_slot[slot_id].len()
    }

    pub fn contains(&self, slot_id: SlotId, word_id: WordId) -> bool {
        self.options_by_slot[slot_id].binary_search(&word_id).is_ok()
    }
}

/// Remove every option whose length doesn't match its slot. Returns how many options were removed.
pub fn enforce_node_consistency<G: ConstraintGraph>(
    graph: &G,
    words: &WordList,
    domains: &mut Domains,
) -> usize {
    let mut pruned = 0;

    for (slot_id, options) in domains.options_by_slot.iter_mut().enumerate() {
        let length = graph.variable(slot_id).length;
        let option_count = options.len();

        options.retain(|&word_id| words.words[word_id].glyphs.len() == length);
        pruned += option_count - options.len();
    }

    pruned
}

/// Make `slot_id` arc consistent with `other_slot_id`: drop every option for which no option of
/// the other slot has the same letter in the shared cell. An identical word doesn't count as
/// support, since two slots can never hold the same word. Returns whether anything was removed;
/// slots that don't cross are left alone.
pub fn revise<G: ConstraintGraph>(
    graph: &G,
    words: &WordList,
    domains: &mut Domains,
    slot_id: SlotId,
    other_slot_id: SlotId,
) -> bool {
    let overlap = match graph.overlap(slot_id, other_slot_id) {
        Some(overlap) => overlap,
        None => return false,
    };

    let options = &domains.options_by_slot[slot_id];
    let other_options = &domains.options_by_slot[other_slot_id];

    let kept: Vec<WordId> = options.iter().cloned().filter(|&word_id| {
        let glyph = match words.words[word_id].glyphs.get(overlap.cell) {
            Some(&glyph) => glyph,
            None => return false,
        };

        // Stop at the first option that supports this word.
        other_options.iter().any(|&other_word_id| {
            other_word_id != word_id &&
                words.words[other_word_id].glyphs.get(overlap.other_cell) == Some(&glyph)
        })
    }).collect();

    if kept.len() == options.len() {
        return false;
    }

    domains.options_by_slot[slot_id] = kept;
    true
}

/// Data structure used in `enforce_arc_consistency` to track which arcs we still need to revise.
/// An arc that is already waiting in the queue isn't added a second time.
#[derive(Debug)]
struct ArcQueue {
    queue: VecDeque<(SlotId, SlotId)>,
    queued: HashSet<(SlotId, SlotId)>,
}

impl ArcQueue {
    fn with_initial_queue<Items>(items: Items) -> ArcQueue
        where
            Items: IntoIterator<Item=(SlotId, SlotId)>
    {
        let mut queue = ArcQueue { queue: VecDeque::new(), queued: HashSet::new() };
        for arc in items {
            queue.enqueue(arc);
        }
        queue
    }

    fn pop_front(&mut self) -> Option<(SlotId, SlotId)> {
        let arc = self.queue.pop_front()?;
        self.queued.remove(&arc);
        Some(arc)
    }

    fn enqueue(&mut self, arc: (SlotId, SlotId)) {
        if self.queued.insert(arc) {
            self.queue.push_back(arc);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcConsistencySuccess {
    /// How many arcs were revised on the way to the fixpoint.
    pub revisions: u64,
    /// How many options were removed across all slots.
    pub pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcConsistencyFailure {
    /// The slot whose options ran out. No fill exists for the domains we started with.
    pub exhausted_slot_id: SlotId,
}

pub type ArcConsistencyResult = Result<ArcConsistencySuccess, ArcConsistencyFailure>;

/// Make every slot arc consistent with each of its neighbors (AC-3). If `arcs` is None we start
/// from every (slot, neighbor) pair in the grid, otherwise just from the given arcs. Whenever a
/// slot loses options, the arcs pointing into it from its other neighbors are revisited.
pub fn enforce_arc_consistency<G: ConstraintGraph>(
    graph: &G,
    words: &WordList,
    domains: &mut Domains,
    arcs: Option<&[(SlotId, SlotId)]>,
) -> ArcConsistencyResult {
    let mut queue = match arcs {
        Some(arcs) => ArcQueue::with_initial_queue(arcs.iter().cloned()),
        None => ArcQueue::with_initial_queue(
            (0..graph.slot_count()).flat_map(|slot_id| {
                graph.neighbors(slot_id).iter().map(move |other_slot_id| (slot_id, other_slot_id))
            })
        ),
    };

    let mut revisions = 0;
    let mut pruned = 0;

    while let Some((slot_id, other_slot_id)) = queue.pop_front() {
        revisions += 1;
        let option_count = domains.len(slot_id);

        if !revise(graph, words, domains, slot_id, other_slot_id) {
            continue;
        }

        pruned += option_count - domains.len(slot_id);

        if domains.len(slot_id) == 0 {
            return Err(ArcConsistencyFailure { exhausted_slot_id: slot_id });
        }

        for neighbor_slot_id in graph.neighbors(slot_id).iter() {
            if neighbor_slot_id != other_slot_id {
                queue.enqueue((neighbor_slot_id, slot_id));
            }
        }
    }

    Ok(ArcConsistencySuccess { revisions, pruned })
}

/// A mapping from some of the slots to the words chosen for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    words_by_slot: Vec<Option<WordId>>,
    assigned_slot_ids: BitSet,
}

impl Assignment {
    pub fn new(slot_count: usize) -> Assignment {
        Assignment {
            words_by_slot: vec![None; slot_count],
            assigned_slot_ids: BitSet::with_capacity(slot_count),
        }
    }

    pub fn get(&self, slot_id: SlotId) -> Option<WordId> {
        self.words_by_slot.get(slot_id).cloned().flatten()
    }

    pub fn contains(&self, slot_id: SlotId) -> bool {
        self.assigned_slot_ids.contains(slot_id)
    }

    pub fn len(&self) -> usize {
        self.assigned_slot_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned_slot_ids.is_empty()
    }

    /// Does every slot have a word?
    pub fn is_complete(&self) -> bool {
        self.len() == self.words_by_slot.len()
    }

    /// Iterate over (slot, word) pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item=(SlotId, WordId)> + '_ {
        self.assigned_slot_ids.iter().filter_map(move |slot_id| {
            self.words_by_slot[slot_id].map(|word_id| (slot_id, word_id))
        })
    }

    pub fn bind(&mut self, slot_id: SlotId, word_id: WordId) {
        self.words_by_slot[slot_id] = Some(word_id);
        self.assigned_slot_ids.insert(slot_id);
    }

    pub fn unbind(&mut self, slot_id: SlotId) {
        self.words_by_slot[slot_id] = None;
        self.assigned_slot_ids.remove(slot_id);
    }

    /// Check the word bound to `slot_id` against every other bound slot: the word has the slot's
    /// length, no other slot holds the same word, and every crossing agrees on its letter. An
    /// unbound slot is trivially consistent.
    pub fn is_consistent_with<G: ConstraintGraph>(
        &self,
        graph: &G,
        words: &WordList,
        slot_id: SlotId,
    ) -> bool {
        let word_id = match self.get(slot_id) {
            Some(word_id) => word_id,
            None => return true,
        };
        let word = &words.words[word_id];

        if word.glyphs.len() != graph.variable(slot_id).length {
            return false;
        }

        self.iter().filter(|&(other_slot_id, _)| other_slot_id != slot_id).all(|(other_slot_id, other_word_id)| {
            if other_word_id == word_id {
                return false;
            }

            match graph.overlap(slot_id, other_slot_id) {
                Some(overlap) => {
                    word.glyphs.get(overlap.cell) ==
                        words.words[other_word_id].glyphs.get(overlap.other_cell)
                }
                None => true,
            }
        })
    }

    /// Check every bound slot with `is_consistent_with`.
    pub fn is_consistent<G: ConstraintGraph>(&self, graph: &G, words: &WordList) -> bool {
        self.assigned_slot_ids.iter().all(|slot_id| self.is_consistent_with(graph, words, slot_id))
    }
}

/// A tentative binding made during search. The slot is unbound again when the guard is dropped,
/// whichever way the search frame that owns it exits.
struct Binding<'a> {
    assignment: &'a mut Assignment,
    slot_id: SlotId,
}

impl<'a> Binding<'a> {
    fn new(assignment: &'a mut Assignment, slot_id: SlotId, word_id: WordId) -> Binding<'a> {
        assignment.bind(slot_id, word_id);
        Binding { assignment, slot_id }
    }
}

impl Deref for Binding<'_> {
    type Target = Assignment;

    fn deref(&self) -> &Assignment {
        &*self.assignment
    }
}

impl DerefMut for Binding<'_> {
    fn deref_mut(&mut self) -> &mut Assignment {
        &mut *self.assignment
    }
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        self.assignment.unbind(self.slot_id);
    }
}

/// Options for a call to `solve_with_options`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveOptions {
    /// Give up once the search has visited this many states.
    pub node_limit: Option<u64>,
}

/// A struct tracking statistics about the filling process.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub revisions: u64,
    pub pruned: usize,
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// A struct representing the results of a fill operation.
#[derive(Debug)]
pub struct FillSuccess {
    pub statistics: Statistics,
    pub assignment: Assignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillFailure {
    /// Hit `SolveOptions::node_limit` before finding a fill or proving there isn't one.
    ExhaustedNodeLimit,
    /// There is no fill for this grid and word list.
    HardFailure,
}

/// Initial letter counts for each cell of a slot, indexed `[cell][glyph]`.
type GlyphCountsByCell = Vec<SmallVec<[u32; MAX_GLYPH_COUNT]>>;

fn build_glyph_counts_by_cell(words: &WordList, slot_length: usize, options: &[WordId]) -> GlyphCountsByCell {
    let mut result: GlyphCountsByCell =
        (0..slot_length).map(|_| smallvec![0; words.glyphs.len()]).collect();

    for &word_id in options {
        for (counts, &glyph) in result.iter_mut().zip(&words.words[word_id].glyphs) {
            counts[glyph] += 1;
        }
    }

    result
}

/// Backtracking search over fixed domains. The domains are never pruned while searching, which is
/// what lets us precompute the per-cell letter counts used for value ordering.
struct Search<'a, G: ConstraintGraph> {
    graph: &'a G,
    words: &'a WordList,
    domains: &'a Domains,
    glyph_counts_by_slot: Vec<GlyphCountsByCell>,
    node_limit: Option<u64>,
    statistics: Statistics,
}

impl<'a, G: ConstraintGraph> Search<'a, G> {
    fn new(
        graph: &'a G,
        words: &'a WordList,
        domains: &'a Domains,
        node_limit: Option<u64>,
        statistics: Statistics,
    ) -> Search<'a, G> {
        let glyph_counts_by_slot = (0..graph.slot_count()).map(|slot_id| {
            build_glyph_counts_by_cell(words, graph.variable(slot_id).length, domains.options(slot_id))
        }).collect();

        Search { graph, words, domains, glyph_counts_by_slot, node_limit, statistics }
    }

    /// Pick the unfilled slot with the fewest remaining options, preferring slots with more
    /// neighbors when that's a tie.
    fn select_unassigned_slot(&self, assignment: &Assignment) -> Option<SlotId> {
        (0..self.graph.slot_count())
            .filter(|&slot_id| !assignment.contains(slot_id))
            .min_by_key(|&slot_id| {
                (self.domains.len(slot_id), Reverse(self.graph.neighbors(slot_id).len()))
            })
    }

    /// How many options would choosing `word_id` for `slot_id` rule out among the given
    /// neighbors? An option is ruled out if it's the same word or has a different letter in the
    /// shared cell.
    fn count_eliminated(&self, slot_id: SlotId, word_id: WordId, neighbor_slot_ids: &[SlotId]) -> usize {
        let word = &self.words.words[word_id];

        neighbor_slot_ids.iter().map(|&neighbor_slot_id| {
            let overlap = match self.graph.overlap(slot_id, neighbor_slot_id) {
                Some(overlap) => overlap,
                None => return 0,
            };
            let glyph = word.glyphs[overlap.cell];
            let agreeing =
                self.glyph_counts_by_slot[neighbor_slot_id][overlap.other_cell][glyph] as usize;

            // The word itself agrees with its own letter only when both offsets hold the same one.
            let identical = self.domains.contains(neighbor_slot_id, word_id) &&
                word.glyphs.get(overlap.other_cell) == Some(&glyph);

            self.domains.len(neighbor_slot_id) - agreeing + identical as usize
        }).sum()
    }

    /// Order the options for a slot so that the ones ruling out the fewest options among its
    /// unfilled neighbors come first.
    fn order_domain_values(&self, slot_id: SlotId, assignment: &Assignment) -> Vec<WordId> {
        let neighbor_slot_ids: SmallVec<[SlotId; MAX_SLOT_LENGTH]> =
            self.graph.neighbors(slot_id).iter()
                .filter(|&neighbor_slot_id| !assignment.contains(neighbor_slot_id))
                .collect();

        let mut options = self.domains.options(slot_id).to_vec();
        options.sort_by_cached_key(|&word_id| {
            self.count_eliminated(slot_id, word_id, &neighbor_slot_ids)
        });
        options
    }

    /// Extend `assignment` depth-first. Returns a snapshot of the first complete consistent
    /// assignment found, or None if this branch has none. `assignment` itself is left exactly as
    /// it was passed in.
    fn backtrack(&mut self, assignment: &mut Assignment) -> Result<Option<Assignment>, FillFailure> {
        let slot_id = match self.select_unassigned_slot(assignment) {
            Some(slot_id) => slot_id,
            None => return Ok(Some(assignment.clone())),
        };

        self.statistics.states += 1;
        if self.node_limit.map(|limit| self.statistics.states > limit).unwrap_or(false) {
            return Err(FillFailure::ExhaustedNodeLimit);
        }

        trace!(
            "state {}: filling slot {} ({} options, {} filled)",
            self.statistics.states,
            slot_id,
            self.domains.len(slot_id),
            assignment.len(),
        );

        for word_id in self.order_domain_values(slot_id, assignment) {
            let mut binding = Binding::new(assignment, slot_id, word_id);

            if !binding.is_consistent_with(self.graph, self.words, slot_id) {
                continue;
            }

            if let Some(solution) = self.backtrack(&mut binding)? {
                return Ok(Some(solution));
            }

            self.statistics.backtracks += 1;
        }

        Ok(None)
    }
}

/// Fill the grid with words from `words`; see `solve_with_options`.
pub fn solve<G: ConstraintGraph>(graph: &G, words: &WordList) -> Result<FillSuccess, FillFailure> {
    solve_with_options(graph, words, &SolveOptions::default())
}

/// Fill the grid: give every slot the whole word list, strip out words of the wrong length, make
/// the grid arc consistent, and then backtrack over what's left.
pub fn solve_with_options<G: ConstraintGraph>(
    graph: &G,
    words: &WordList,
    options: &SolveOptions,
) -> Result<FillSuccess, FillFailure> {
    let start = Instant::now();
    let mut statistics = Statistics::default();

    let mut domains = Domains::new(graph.slot_count(), words);
    statistics.pruned += enforce_node_consistency(graph, words, &mut domains);

    match enforce_arc_consistency(graph, words, &mut domains, None) {
        Ok(ArcConsistencySuccess { revisions, pruned }) => {
            statistics.revisions = revisions;
            statistics.pruned += pruned;
        }
        Err(ArcConsistencyFailure { exhausted_slot_id }) => {
            debug!(
                "Arc consistency exhausted slot {} ({:?}); no fill exists",
                exhausted_slot_id,
                graph.variable(exhausted_slot_id),
            );
            return Err(FillFailure::HardFailure);
        }
    }

    info!(
        "Pruned {} options from {} slots in {:?}",
        statistics.pruned,
        graph.slot_count(),
        start.elapsed(),
    );

    let mut search = Search::new(graph, words, &domains, options.node_limit, statistics);
    let mut assignment = Assignment::new(graph.slot_count());
    let result = search.backtrack(&mut assignment);

    let mut statistics = search.statistics;
    statistics.duration = start.elapsed();

    match result {
        Ok(Some(assignment)) => {
            debug!("Found a fill: {:?}", statistics);
            Ok(FillSuccess { statistics, assignment })
        }
        Ok(None) => {
            debug!("Search exhausted without a fill: {:?}", statistics);
            Err(FillFailure::HardFailure)
        }
        Err(failure) => {
            debug!("Search gave up ({:?}): {:?}", failure, statistics);
            Err(failure)
        }
    }
}

/// Return a 2D array of the letters placed by `assignment`, indexed `[row][col]`.
pub fn letter_grid(config: &GridConfig, words: &WordList, assignment: &Assignment) -> Vec<Vec<Option<char>>> {
    let mut letters = vec![vec![None; config.width]; config.height];

    for (slot_id, word_id) in assignment.iter() {
        let variable = &config.slot_configs[slot_id].variable;

        for ((row, col), &glyph) in variable.cell_coords().into_iter().zip(&words.words[word_id].glyphs) {
            letters[row][col] = Some(words.glyphs[glyph]);
        }
    }

    letters
}

/// Turn the given grid config and assignment into a rendered string, with `█` for blocks and a
/// space for open cells that haven't been filled.
pub fn render_grid(config: &GridConfig, words: &WordList, assignment: &Assignment) -> String {
    let letters = letter_grid(config, words, assignment);

    config.structure.iter().zip(&letters).map(|(structure_row, letter_row)| {
        structure_row.iter().zip(letter_row).map(|(&open, letter)| {
            if open { letter.unwrap_or(' ') } else { '█' }
        }).collect::<String>()
    }).collect::<Vec<_>>().join("\n")
}
