//! Ordered OID handler lookup

use alloc::vec::Vec;

use ndis_rs::Oid;

/// A handler registered for one OID
pub struct HandlerEntry<H> {
    pub oid: Oid,
    pub min_input_length: u32,
    pub min_output_length: u32,
    pub handler: H,
}

impl<H> core::fmt::Debug for HandlerEntry<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("oid", &self.oid)
            .field("min_input_length", &self.min_input_length)
            .field("min_output_length", &self.min_output_length)
            .finish_non_exhaustive()
    }
}

/// Outcome of looking up a handler in a [`HandlerChain`]
#[derive(Debug)]
pub enum Lookup<'a, H> {
    Found(&'a HandlerEntry<H>),
    NotFound,
    /// The first entry for the OID wants larger buffers than were supplied
    BufferTooSmall { bytes_needed: u32 },
}

/// Handlers searched in registration order
///
/// The first entry whose OID matches decides the lookup, even when the
/// supplied buffers are too small for it. Later entries for the same OID are
/// never reached.
pub struct HandlerChain<H> {
    entries: Vec<HandlerEntry<H>>,
}

impl<H> HandlerChain<H> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a handler to the end of the search order
    pub fn push(&mut self, oid: Oid, min_input_length: u32, min_output_length: u32, handler: H) {
        self.entries.push(HandlerEntry {
            oid,
            min_input_length,
            min_output_length,
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerEntry<H>> {
        self.entries.iter()
    }

    pub fn find(&self, oid: Oid, input_length: u32, output_length: u32) -> Lookup<'_, H> {
        let Some(entry) = self.entries.iter().find(|entry| entry.oid == oid) else {
            return Lookup::NotFound;
        };

        if entry.min_input_length > input_length || entry.min_output_length > output_length {
            Lookup::BufferTooSmall {
                bytes_needed: entry.min_input_length.max(entry.min_output_length),
            }
        } else {
            Lookup::Found(entry)
        }
    }
}

impl<H> Default for HandlerChain<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use ndis_rs::Oid;

    use super::{HandlerChain, Lookup};

    const OID_A: Oid = Oid(0x0001_0101);
    const OID_B: Oid = Oid(0x0001_0102);

    fn found(lookup: Lookup<'_, &'static str>) -> Option<&'static str> {
        match lookup {
            Lookup::Found(entry) => Some(entry.handler),
            _ => None,
        }
    }

    #[test]
    fn empty_chain_not_found() {
        let chain = HandlerChain::<()>::new();
        assert!(matches!(chain.find(OID_A, 100, 100), Lookup::NotFound));
    }

    #[test]
    fn finds_matching_oid() {
        let mut chain = HandlerChain::new();
        chain.push(OID_A, 4, 0, "a");
        chain.push(OID_B, 0, 8, "b");

        assert_eq!(found(chain.find(OID_B, 0, 8)), Some("b"));
        assert_eq!(found(chain.find(OID_A, 4, 0)), Some("a"));
        assert!(matches!(chain.find(Oid(0xDEAD), 100, 100), Lookup::NotFound));
    }

    #[test]
    fn first_inserted_wins() {
        let mut chain = HandlerChain::new();
        chain.push(OID_A, 0, 0, "first");
        chain.push(OID_A, 0, 0, "second");

        assert_eq!(found(chain.find(OID_A, 0, 0)), Some("first"));
    }

    #[test]
    fn too_small_input_stops_search() {
        let mut chain = HandlerChain::new();
        chain.push(OID_A, 16, 0, "picky");
        // Would accept the buffers, but is never looked at
        chain.push(OID_A, 0, 0, "lenient");

        assert!(matches!(
            chain.find(OID_A, 8, 0),
            Lookup::BufferTooSmall { bytes_needed: 16 }
        ));
    }

    #[test]
    fn too_small_output() {
        let mut chain = HandlerChain::new();
        chain.push(OID_B, 0, 32, "query");

        assert!(matches!(
            chain.find(OID_B, 0, 31),
            Lookup::BufferTooSmall { bytes_needed: 32 }
        ));
        assert_eq!(found(chain.find(OID_B, 0, 32)), Some("query"));
    }

    #[test]
    fn iterates_in_registration_order() {
        let mut chain = HandlerChain::new();
        chain.push(OID_B, 0, 0, 1);
        chain.push(OID_A, 0, 0, 2);

        let order = chain.iter().map(|entry| entry.handler).collect::<std::vec::Vec<_>>();
        assert_eq!(order, [1, 2]);
        assert_eq!(chain.len(), 2);
    }
}
