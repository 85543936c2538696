//! Parallel graph evaluation
//!
//! [`ParallelConfig`] sizes a Rayon thread pool; [`Executor`] evaluates the
//! task graph of a [`ChunkedArray`] on it, one layer at a time with the tasks
//! of a layer running in parallel.

use crate::array::ChunkedArray;
use crate::block::Block;
use crate::errors::{ReductionError, Result};
use crate::graph::{block_indices, Key, Layer, Task};
use crate::primitives::{BlockPrimitives, NdarrayPrimitives};
use log::{debug, info, trace};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for parallel processing
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    #[must_use]
    pub const fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Create a configuration that uses all available CPU cores
    #[must_use]
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    /// Create a configuration that uses a specific number of threads
    #[must_use]
    pub const fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Build a dedicated thread pool with this configuration
    ///
    /// # Errors
    ///
    /// Returns [`ReductionError::ThreadPoolError`] if Rayon cannot start the
    /// pool.
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(num_threads) = self.num_threads {
            builder = builder.num_threads(num_threads);
        }
        builder.build().map_err(|e| {
            ReductionError::ThreadPoolError(format!(
                "Failed to initialize thread pool with {:?} threads: {e}",
                self.num_threads
            ))
        })
    }
}

/// Evaluates task graphs with a block primitive provider
pub struct Executor<P: BlockPrimitives = NdarrayPrimitives> {
    primitives: P,
    pool: ThreadPool,
}

impl Executor<NdarrayPrimitives> {
    /// Executor with the default primitives
    ///
    /// # Errors
    ///
    /// Returns an error if the thread pool cannot be built.
    pub fn new(config: &ParallelConfig) -> Result<Self> {
        Self::with_primitives(NdarrayPrimitives, config)
    }
}

impl<P: BlockPrimitives> Executor<P> {
    /// Executor with a custom primitive provider
    ///
    /// # Errors
    ///
    /// Returns an error if the thread pool cannot be built.
    pub fn with_primitives(primitives: P, config: &ParallelConfig) -> Result<Self> {
        Ok(Self {
            primitives,
            pool: config.build_pool()?,
        })
    }

    #[must_use]
    pub fn primitives(&self) -> &P {
        &self.primitives
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Evaluate `x` and stitch its blocks into a single block
    ///
    /// The result is cast to the array's element type when it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if a task fails or the graph is incomplete.
    pub fn compute(&self, x: &ChunkedArray) -> Result<Block> {
        let order = x.graph().execution_order(x.name())?;
        info!(
            "computing '{}' on {} threads: {} layers, {} tasks",
            x.name(),
            self.num_threads(),
            order.len(),
            order.iter().map(|layer| layer.len()).sum::<usize>()
        );

        let mut results: HashMap<Key, Arc<Block>> = HashMap::new();
        for layer in &order {
            let computed = self.pool.install(|| self.run_layer(layer, &results))?;
            debug!("layer '{}' done: {} blocks", layer.name(), computed.len());
            results.extend(computed);
        }

        let blocks = block_indices(&x.numblocks())
            .into_iter()
            .map(|index| fetch(&results, &x.key(index)).map(|block| (*block).clone()))
            .collect::<Result<Vec<_>>>()?;
        let assembled = Block::concatenate_grid(blocks, &x.numblocks())?;

        let result = match x.dtype() {
            Some(dtype) => assembled.cast(dtype)?,
            None => assembled,
        };
        info!("computed '{}' with shape {:?}", x.name(), result.shape());
        Ok(result)
    }

    fn run_layer(
        &self,
        layer: &Layer,
        results: &HashMap<Key, Arc<Block>>,
    ) -> Result<Vec<(Key, Arc<Block>)>> {
        layer
            .tasks()
            .par_iter()
            .map(|(index, task)| {
                let key = Key::new(layer.name(), index.clone());
                trace!("running task {}{:?}", key.name, key.index);
                let block = self.run_task(task, results)?;
                Ok((key, block))
            })
            .collect()
    }

    fn run_task(
        &self,
        task: &Task,
        results: &HashMap<Key, Arc<Block>>,
    ) -> Result<Arc<Block>> {
        match task {
            Task::Literal(block) => Ok(Arc::clone(block)),
            Task::Elementwise { op, input } => {
                let block = fetch(results, input)?;
                Ok(Arc::new(self.primitives.elementwise(*op, &block)?))
            }
            Task::Apply {
                func,
                axes,
                keepdims,
                inputs,
                grid,
            } => {
                let blocks = inputs
                    .iter()
                    .map(|key| fetch(results, key).map(|block| (*block).clone()))
                    .collect::<Result<Vec<_>>>()?;
                let joined = Block::concatenate_grid(blocks, grid)?;
                Ok(Arc::new(func.apply(
                    &joined,
                    axes,
                    *keepdims,
                    &self.primitives,
                )?))
            }
        }
    }
}

fn fetch(results: &HashMap<Key, Arc<Block>>, key: &Key) -> Result<Arc<Block>> {
    results
        .get(key)
        .map(Arc::clone)
        .ok_or_else(|| missing_task(key))
}

fn missing_task(key: &Key) -> ReductionError {
    ReductionError::MissingTask {
        name: key.name.to_string(),
        index: key.index.clone(),
    }
}
