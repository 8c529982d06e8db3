// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Field-level protocol model.
//!
//! A physical RS connection carries named fields. Fields a port exposes at
//! its HDL boundary are *terminal*; fields a node transports opaquely from
//! input to output live in its *carrier* protocol, split into a jection
//! region (injected/ejected at this node) and per-domain regions laid out
//! on top of each other (only one domain's data is in flight at a time,
//! so the carrier reserves the widest).

use crate::core::bits::BitsVal;
use crate::core::error::{Result, SynthError};
use crate::core::model::port::SigRole;

/// Reserved field types. Ordering is part of the wire layout: field sets
/// sort by (type, tag, domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldType {
    UserData,
    UserAddr,
    Eop,
    XmisId,
    SplitMask,
}

/// Identity of a field: type, optional tag, optional RS domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldId {
    pub ftype: FieldType,
    pub tag: Option<String>,
    pub domain: Option<u32>,
}

impl FieldId {
    pub fn new(ftype: FieldType) -> Self {
        Self {
            ftype,
            tag: None,
            domain: None,
        }
    }

    pub fn tagged(ftype: FieldType, tag: impl Into<String>) -> Self {
        Self {
            ftype,
            tag: Some(tag.into()),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: u32) -> Self {
        self.domain = Some(domain);
        self
    }

    fn sort_key(&self) -> (FieldType, &str, u32) {
        (
            self.ftype,
            self.tag.as_deref().unwrap_or(""),
            self.domain.unwrap_or(u32::MAX),
        )
    }
}

impl PartialOrd for FieldId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// A concretely-sized instance of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub id: FieldId,
    pub width: u32,
}

impl Field {
    pub fn new(id: FieldId, width: u32) -> Self {
        Self { id, width }
    }
}

/// An ordered set of field instances with unique identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<Field>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn has(&self, id: &FieldId) -> bool {
        self.fields.iter().any(|f| f.id == *id)
    }

    pub fn get(&self, id: &FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == *id)
    }

    /// Insert in sorted position; duplicates are ignored.
    pub fn add(&mut self, field: Field) {
        match self.fields.binary_search_by(|f| f.id.cmp(&field.id)) {
            Ok(_) => {}
            Err(pos) => self.fields.insert(pos, field),
        }
    }

    pub fn add_set(&mut self, other: &FieldSet) {
        for f in other.iter() {
            self.add(f.clone());
        }
    }

    pub fn remove(&mut self, id: &FieldId) {
        self.fields.retain(|f| f.id != *id);
    }

    /// Remove members found in `other`.
    pub fn subtract(&mut self, other: &FieldSet) {
        self.fields.retain(|f| !other.has(&f.id));
    }

    /// Keep only members found in `other`.
    pub fn intersect(&mut self, other: &FieldSet) {
        self.fields.retain(|f| other.has(&f.id));
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Cumulative width of the fields preceding `id`, i.e. the field's
    /// stable bit position within this set.
    pub fn lsb(&self, id: &FieldId) -> Option<u32> {
        let mut acc = 0;
        for f in &self.fields {
            if f.id == *id {
                return Some(acc);
            }
            acc += f.width;
        }
        None
    }

    pub fn width(&self) -> u32 {
        self.fields.iter().map(|f| f.width).sum()
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        let mut set = FieldSet::new();
        for f in iter {
            set.add(f);
        }
        set
    }
}

/// Extra per-field information held by a port protocol.
#[derive(Debug, Clone, PartialEq)]
struct FieldInfo {
    id: FieldId,
    binding: Option<SigRole>,
    const_val: Option<BitsVal>,
}

/// The protocol of an RS port: the terminal fields it exposes, the role
/// binding each appears on, and optional constant tie-off values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortProtocol {
    terminal: FieldSet,
    info: Vec<FieldInfo>,
}

impl PortProtocol {
    pub fn add_terminal_field(&mut self, field: Field, binding: SigRole) {
        let id = field.id.clone();
        self.terminal.add(field);
        self.info.push(FieldInfo {
            id,
            binding: Some(binding),
            const_val: None,
        });
    }

    pub fn terminal_fields(&self) -> &FieldSet {
        &self.terminal
    }

    pub fn has_terminal_field(&self, id: &FieldId) -> bool {
        self.terminal.has(id)
    }

    pub fn get_terminal_field(&self, id: &FieldId) -> Option<&Field> {
        self.terminal.get(id)
    }

    /// Terminal fields that have no constant recorded.
    pub fn terminal_fields_nonconst(&self) -> FieldSet {
        self.terminal
            .iter()
            .filter(|f| self.get_const(&f.id).is_none())
            .cloned()
            .collect()
    }

    /// Record a constant that short-circuits the field's data source.
    pub fn set_const(&mut self, id: &FieldId, val: BitsVal) {
        if let Some(info) = self.info.iter_mut().find(|i| i.id == *id) {
            info.const_val = Some(val);
        } else {
            self.info.push(FieldInfo {
                id: id.clone(),
                binding: None,
                const_val: Some(val),
            });
        }
    }

    pub fn get_const(&self, id: &FieldId) -> Option<&BitsVal> {
        self.info
            .iter()
            .find(|i| i.id == *id)
            .and_then(|i| i.const_val.as_ref())
    }

    pub fn binding(&self, id: &FieldId) -> Result<&SigRole> {
        self.info
            .iter()
            .find(|i| i.id == *id)
            .and_then(|i| i.binding.as_ref())
            .ok_or_else(|| SynthError::general(format!("no binding for terminal field {id:?}")))
    }
}

/// Fields a node promises to transport opaquely from input to output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarrierProtocol {
    jection: FieldSet,
    domains: Vec<(u32, FieldSet)>,
}

impl CarrierProtocol {
    pub fn clear(&mut self) {
        self.jection.clear();
        self.domains.clear();
    }

    /// Add fields, routing domain-scoped ones to their domain set.
    pub fn add_set(&mut self, set: &FieldSet) {
        for f in set.iter() {
            match f.id.domain {
                Some(dom) => self.domain_set_mut(dom).add(f.clone()),
                None => self.jection.add(f.clone()),
            }
        }
    }

    pub fn jection_fields(&self) -> &FieldSet {
        &self.jection
    }

    /// Union of all domain sets.
    pub fn domain_fields(&self) -> FieldSet {
        let mut out = FieldSet::new();
        for (_, set) in &self.domains {
            out.add_set(set);
        }
        out
    }

    pub fn has(&self, id: &FieldId) -> bool {
        if self.jection.has(id) {
            return true;
        }
        match id.domain {
            Some(dom) => self.domain_set(dom).map(|s| s.has(id)).unwrap_or(false),
            None => false,
        }
    }

    /// Bit position of a field within the combined carrier encoding:
    /// jection fields first, then the domain region.
    pub fn lsb(&self, id: &FieldId) -> Option<u32> {
        if let Some(lsb) = self.jection.lsb(id) {
            return Some(lsb);
        }
        let dom = id.domain?;
        let set = self.domain_set(dom)?;
        set.lsb(id).map(|lsb| self.domain_lsb() + lsb)
    }

    pub fn get_field(&self, id: &FieldId) -> Option<&Field> {
        self.jection.get(id).or_else(|| {
            id.domain
                .and_then(|dom| self.domain_set(dom))
                .and_then(|s| s.get(id))
        })
    }

    pub fn total_width(&self) -> u32 {
        self.jection.width() + self.domain_width()
    }

    pub fn domain_lsb(&self) -> u32 {
        self.jection.width()
    }

    /// The domain region is as wide as the widest single domain set.
    pub fn domain_width(&self) -> u32 {
        self.domains.iter().map(|(_, s)| s.width()).max().unwrap_or(0)
    }

    fn domain_set(&self, dom: u32) -> Option<&FieldSet> {
        self.domains.iter().find(|(d, _)| *d == dom).map(|(_, s)| s)
    }

    fn domain_set_mut(&mut self, dom: u32) -> &mut FieldSet {
        if let Some(pos) = self.domains.iter().position(|(d, _)| *d == dom) {
            return &mut self.domains[pos].1;
        }
        self.domains.push((dom, FieldSet::new()));
        &mut self.domains.last_mut().unwrap().1
    }
}

/// Bits transmitted over a physical RS link between a source and sink,
/// given each side's port protocol and optional carrier protocol.
///
/// Common (terminal ∪ jection) fields travel once; the domain region is
/// carried opaquely when both ends are carriers, and crosses over between
/// one side's domain region and the other side's terminals otherwise.
pub fn transmitted_width(
    src_proto: &PortProtocol,
    src_carrier: Option<&CarrierProtocol>,
    sink_proto: &PortProtocol,
    sink_carrier: Option<&CarrierProtocol>,
) -> u32 {
    let mut src_set = src_proto.terminal_fields().clone();
    if let Some(c) = src_carrier {
        src_set.add_set(c.jection_fields());
    }

    let mut sink_set = sink_proto.terminal_fields().clone();
    if let Some(c) = sink_carrier {
        sink_set.add_set(c.jection_fields());
    }

    src_set.intersect(&sink_set);
    let mut width = src_set.width();

    match (src_carrier, sink_carrier) {
        (Some(src_c), Some(_)) => {
            // Opaque domain carry; both sides agree on the domain width by
            // invariant, so either side is representative.
            width += src_c.domain_width();
        }
        (Some(src_c), None) => {
            let mut common = src_c.domain_fields();
            common.intersect(sink_proto.terminal_fields());
            width += common.width();
        }
        (None, Some(sink_c)) => {
            let mut common = sink_c.domain_fields();
            common.intersect(src_proto.terminal_fields());
            width += common.width();
        }
        (None, None) => {}
    }

    width
}

/// The field set a newly-spliced intermediate carrier must transport to
/// keep widths consistent on both halves of the spliced connection: the
/// intersection of everything the sink side consumes with everything the
/// source side provides.
pub fn splice_carriage(
    src_proto: &PortProtocol,
    src_carrier: Option<&CarrierProtocol>,
    sink_proto: &PortProtocol,
    sink_carrier: Option<&CarrierProtocol>,
) -> FieldSet {
    let mut carriage = sink_proto.terminal_fields().clone();
    if let Some(c) = sink_carrier {
        carriage.add_set(&c.domain_fields());
        carriage.add_set(c.jection_fields());
    }

    let mut src_set = src_proto.terminal_fields().clone();
    if let Some(c) = src_carrier {
        src_set.add_set(&c.domain_fields());
        src_set.add_set(c.jection_fields());
    }

    carriage.intersect(&src_set);
    carriage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::port::{RoleKind, SigRole};

    fn f(ftype: FieldType, width: u32) -> Field {
        Field::new(FieldId::new(ftype), width)
    }

    fn data(tag: &str, dom: u32, width: u32) -> Field {
        Field::new(FieldId::tagged(FieldType::UserData, tag).with_domain(dom), width)
    }

    #[test]
    fn add_is_idempotent_and_sorted() {
        let mut s = FieldSet::new();
        s.add(f(FieldType::Eop, 1));
        s.add(f(FieldType::UserAddr, 4));
        s.add(f(FieldType::Eop, 1));
        assert_eq!(s.len(), 2);
        // UserAddr sorts before Eop
        let ids: Vec<FieldType> = s.iter().map(|x| x.id.ftype).collect();
        assert_eq!(ids, vec![FieldType::UserAddr, FieldType::Eop]);
    }

    #[test]
    fn lsb_is_cumulative_width() {
        let mut s = FieldSet::new();
        s.add(data("a", 0, 8));
        s.add(data("b", 0, 3));
        s.add(f(FieldType::Eop, 1));
        assert_eq!(s.lsb(&FieldId::tagged(FieldType::UserData, "a").with_domain(0)), Some(0));
        assert_eq!(s.lsb(&FieldId::tagged(FieldType::UserData, "b").with_domain(0)), Some(8));
        assert_eq!(s.lsb(&FieldId::new(FieldType::Eop)), Some(11));
        assert_eq!(s.width(), 12);
    }

    #[test]
    fn set_algebra() {
        let mut a = FieldSet::new();
        a.add(data("x", 0, 8));
        a.add(f(FieldType::Eop, 1));

        let mut b = FieldSet::new();
        b.add(f(FieldType::Eop, 1));

        // A - A = empty
        let mut aa = a.clone();
        aa.subtract(&a);
        assert!(aa.is_empty());

        // A ∩ A = A
        let mut ai = a.clone();
        ai.intersect(&a);
        assert_eq!(ai, a);

        // commutativity of union
        let mut ab = a.clone();
        ab.add_set(&b);
        let mut ba = b.clone();
        ba.add_set(&a);
        assert_eq!(ab, ba);

        // subtraction removes common members only
        let mut amb = a.clone();
        amb.subtract(&b);
        assert_eq!(amb.len(), 1);
        assert!(amb.has(&FieldId::tagged(FieldType::UserData, "x").with_domain(0)));
    }

    #[test]
    fn carrier_layout_places_jection_first() {
        let mut c = CarrierProtocol::default();
        let mut s = FieldSet::new();
        s.add(f(FieldType::SplitMask, 3)); // no domain: jection
        s.add(data("a", 0, 8));
        s.add(data("b", 1, 16));
        c.add_set(&s);

        assert_eq!(c.domain_lsb(), 3);
        assert_eq!(c.domain_width(), 16); // widest domain wins
        assert_eq!(c.total_width(), 19);
        assert_eq!(c.lsb(&FieldId::new(FieldType::SplitMask)), Some(0));
        assert_eq!(
            c.lsb(&FieldId::tagged(FieldType::UserData, "a").with_domain(0)),
            Some(3)
        );
        assert_eq!(
            c.lsb(&FieldId::tagged(FieldType::UserData, "b").with_domain(1)),
            Some(3)
        );
    }

    #[test]
    fn port_protocol_consts() {
        let mut p = PortProtocol::default();
        p.add_terminal_field(f(FieldType::Eop, 1), SigRole::plain(RoleKind::Eop));
        assert_eq!(p.terminal_fields_nonconst().len(), 1);
        p.set_const(&FieldId::new(FieldType::Eop), BitsVal::from_u64(1, 1));
        assert!(p.terminal_fields_nonconst().is_empty());
        assert!(p.get_const(&FieldId::new(FieldType::Eop)).is_some());
    }

    #[test]
    fn width_rule_cases() {
        let mut src = PortProtocol::default();
        src.add_terminal_field(data("d", 0, 8), SigRole::tagged(RoleKind::DataBundle, "d"));
        let mut sink = PortProtocol::default();
        sink.add_terminal_field(data("d", 0, 8), SigRole::tagged(RoleKind::DataBundle, "d"));

        // terminal-to-terminal: common terminal width
        assert_eq!(transmitted_width(&src, None, &sink, None), 8);

        // carrier on both sides: opaque domain width rides along
        let mut carrier = CarrierProtocol::default();
        let mut cs = FieldSet::new();
        cs.add(data("d", 0, 8));
        carrier.add_set(&cs);
        assert_eq!(
            transmitted_width(&src, Some(&carrier), &sink, Some(&carrier)),
            16
        );

        // carrier only upstream: its domain fields cross to sink terminals
        assert_eq!(transmitted_width(&src, Some(&carrier), &sink, None), 16);

        // disjoint protocols carry nothing
        let empty = PortProtocol::default();
        assert_eq!(transmitted_width(&src, None, &empty, None), 0);
    }

    #[test]
    fn splice_carries_the_conservative_minimum() {
        let mut src = PortProtocol::default();
        src.add_terminal_field(data("d", 0, 8), SigRole::tagged(RoleKind::DataBundle, "d"));
        src.add_terminal_field(f(FieldType::Eop, 1), SigRole::plain(RoleKind::Eop));

        let mut sink = PortProtocol::default();
        sink.add_terminal_field(data("d", 0, 8), SigRole::tagged(RoleKind::DataBundle, "d"));

        // Sink does not consume EOP, so a spliced register need not carry it.
        let carriage = splice_carriage(&src, None, &sink, None);
        assert_eq!(carriage.len(), 1);
        assert!(carriage.has(&FieldId::tagged(FieldType::UserData, "d").with_domain(0)));
    }
}
