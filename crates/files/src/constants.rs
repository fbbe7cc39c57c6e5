/// Prefix marking entries the store never exposes (`.git`, `.DS_Store`, editor swap files).
pub const HIDDEN_ENTRY_PREFIX: char = '.';

/// Separator used between segments of a store key, independent of the host platform.
pub const KEY_SEPARATOR: char = '/';
