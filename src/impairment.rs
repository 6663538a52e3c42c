use crate::packet::DATA_OFFSET;
use crate::random::{Random, RngRandom, SeededRandom};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tracing::{debug, trace};

/// Probabilities and parameters for simulated network impairment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImpairmentConfig {
    /// chance that a packet gets some of its payload bytes modified
    pub corruption_chance: f64,
    /// chance that a packet is not delivered at all
    pub drop_chance: f64,
    /// chance that a packet's delivery is postponed by `delay`
    pub delay_chance: f64,
    pub delay: Duration,
    /// fixed seed for reproducible impairment, random if `None`
    pub seed: Option<u64>,
}

impl ImpairmentConfig {
    pub fn new(corruption_chance: f64, drop_chance: f64, delay_chance: f64, delay: Duration) -> ImpairmentConfig {
        ImpairmentConfig {
            corruption_chance,
            drop_chance,
            delay_chance,
            delay,
            seed: None,
        }.clamped()
    }

    pub fn with_seed(mut self, seed: u64) -> ImpairmentConfig {
        self.seed = Some(seed);
        self
    }

    pub fn clamped(self) -> ImpairmentConfig {
        ImpairmentConfig {
            corruption_chance: clamp_chance(self.corruption_chance),
            drop_chance: clamp_chance(self.drop_chance),
            delay_chance: clamp_chance(self.delay_chance),
            ..self
        }
    }

    pub fn is_active(&self) -> bool {
        self.corruption_chance > 0.0 || self.drop_chance > 0.0 || self.delay_chance > 0.0
    }
}

fn clamp_chance(chance: f64) -> f64 {
    if chance.is_nan() {
        0.0
    }
    else {
        chance.clamp(0.0, 1.0)
    }
}

/// What the simulated network does with a single datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Drop,
    Deliver {
        datagram: Bytes,
        /// number of payload bytes that were modified
        corrupted: usize,
        delay: Option<Duration>,
    },
}

/// Simulates an unreliable network link by dropping, corrupting or delaying datagrams.
///
/// The first [DATA_OFFSET] bytes of a datagram are never modified, so corruption always hits
///  payload and leaves the packet header intact.
pub struct Impairment {
    config: ImpairmentConfig,
    random: Box<dyn Random>,
}

impl Impairment {
    pub fn new(config: ImpairmentConfig, random: Box<dyn Random>) -> Impairment {
        Impairment {
            config: config.clamped(),
            random,
        }
    }

    pub fn from_config(config: &ImpairmentConfig) -> Impairment {
        let random: Box<dyn Random> = match config.seed {
            Some(seed) => Box::new(SeededRandom::new(seed)),
            None => Box::new(RngRandom {}),
        };
        Impairment::new(config.clone(), random)
    }

    pub fn disabled() -> Impairment {
        Impairment::new(ImpairmentConfig::default(), Box::new(RngRandom {}))
    }

    pub fn config(&self) -> &ImpairmentConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    pub fn apply(&self, datagram: Bytes) -> Verdict {
        if !self.is_active() {
            return Verdict::Deliver { datagram, corrupted: 0, delay: None };
        }

        if self.random.next_f64() < self.config.drop_chance {
            debug!("impairment: dropping datagram");
            return Verdict::Drop;
        }

        let (datagram, corrupted) = if self.random.next_f64() < self.config.corruption_chance {
            self.corrupt(datagram)
        }
        else {
            (datagram, 0)
        };

        let delay = if self.random.next_f64() < self.config.delay_chance {
            debug!("impairment: delaying datagram by {:?}", self.config.delay);
            Some(self.config.delay)
        }
        else {
            None
        };

        Verdict::Deliver { datagram, corrupted, delay }
    }

    fn corrupt(&self, datagram: Bytes) -> (Bytes, usize) {
        if datagram.len() <= DATA_OFFSET {
            trace!("impairment: no payload to corrupt");
            return (datagram, 0);
        }

        let num_corrupted = Self::num_bytes_to_corrupt(self.random.next_f64())
            .min(datagram.len() - DATA_OFFSET);

        let mut offsets = Vec::with_capacity(num_corrupted);
        while offsets.len() < num_corrupted {
            let offset = self.random.gen_usize_range(DATA_OFFSET..datagram.len());
            if !offsets.contains(&offset) {
                offsets.push(offset);
            }
        }

        let mut buf = BytesMut::from(datagram.as_ref());
        for &offset in &offsets {
            buf[offset] = buf[offset].wrapping_add(1);
        }
        debug!("impairment: corrupted bytes at offsets {:?}", offsets);
        (buf.freeze(), num_corrupted)
    }

    fn num_bytes_to_corrupt(roll: f64) -> usize {
        if roll <= 0.2 {
            3
        }
        else if roll <= 0.5 {
            2
        }
        else {
            1
        }
    }
}
