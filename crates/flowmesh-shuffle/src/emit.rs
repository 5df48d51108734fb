//! Partition emitters.
//!
//! Each table partition owns one [`Emitter`]: a block writer towards the
//! shuffle destination worker of that partition. The emit format depends on
//! the consumer: a reduce-by-key stage re-extracts keys itself, so sending
//! the bare values is enough; a pair consumer gets the full `(key, value)`
//! pair so nothing has to be recomputed downstream.

use std::marker::PhantomData;

use flowmesh_core::{Item, Result};
use flowmesh_data::{BlockSink, BlockWriter};

/// Wire format choice for emitted entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitKind {
    /// Emit the value alone; the consumer re-extracts the key.
    ValueOnly,
    /// Emit the `(key, value)` pair.
    Pair,
}

/// One partition's outlet: a block writer plus the emit format.
pub struct Emitter<K, V, S: BlockSink> {
    writer: BlockWriter<S>,
    kind: EmitKind,
    emitted: u64,
    _types: PhantomData<fn(K, V)>,
}

impl<K, V, S> Emitter<K, V, S>
where
    K: Item + Clone,
    V: Item + Clone,
    S: BlockSink,
{
    pub fn new(writer: BlockWriter<S>, kind: EmitKind) -> Self {
        Self {
            writer,
            kind,
            emitted: 0,
            _types: PhantomData,
        }
    }

    pub fn emit(&mut self, key: &K, value: &V) -> Result<()> {
        match self.kind {
            EmitKind::ValueOnly => self.writer.put_item(value)?,
            EmitKind::Pair => self.writer.put_item(&(key.clone(), value.clone()))?,
        }
        self.emitted += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.writer.close()
    }

    /// Entries emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_core::BlockPool;
    use flowmesh_data::BlockFile;

    #[test]
    fn test_value_only_and_pair_formats() {
        let pool = BlockPool::new();

        let values = BlockFile::new();
        let writer = BlockWriter::new(values.clone(), pool.clone(), 256).unwrap();
        let mut emitter: Emitter<u64, u64, _> = Emitter::new(writer, EmitKind::ValueOnly);
        emitter.emit(&1, &100).unwrap();
        emitter.emit(&2, &200).unwrap();
        emitter.close().unwrap();
        assert_eq!(emitter.emitted(), 2);

        let mut reader = values.reader();
        assert_eq!(reader.read_remaining::<u64>().unwrap(), vec![100, 200]);

        let pairs = BlockFile::new();
        let writer = BlockWriter::new(pairs.clone(), pool, 256).unwrap();
        let mut emitter: Emitter<u64, u64, _> = Emitter::new(writer, EmitKind::Pair);
        emitter.emit(&1, &100).unwrap();
        emitter.close().unwrap();

        let mut reader = pairs.reader();
        assert_eq!(
            reader.read_remaining::<(u64, u64)>().unwrap(),
            vec![(1, 100)]
        );
    }
}
