use crate::history::MemberLocation;
use crate::member::{MemberId, StructureMember};

pub(crate) fn find(members: &[StructureMember], id: MemberId) -> Option<&StructureMember> {
    for member in members {
        if member.id() == id {
            return Some(member);
        }
        if let Some(found) = find(member.children(), id) {
            return Some(found);
        }
    }
    None
}

pub(crate) fn find_mut(
    members: &mut [StructureMember],
    id: MemberId,
) -> Option<&mut StructureMember> {
    for member in members.iter_mut() {
        if member.id() == id {
            return Some(member);
        }
        if let Some(children) = member.children_mut()
            && let Some(found) = find_mut(children, id)
        {
            return Some(found);
        }
    }
    None
}

pub(crate) fn location_of(
    members: &[StructureMember],
    parent: Option<MemberId>,
    id: MemberId,
) -> Option<MemberLocation> {
    for (index, member) in members.iter().enumerate() {
        if member.id() == id {
            return Some(MemberLocation { parent, index });
        }
        if let Some(location) = location_of(member.children(), Some(member.id()), id) {
            return Some(location);
        }
    }
    None
}

/// Ancestors of `id` ordered from the root list down to its parent.
pub(crate) fn ancestors_of(members: &[StructureMember], id: MemberId) -> Option<Vec<MemberId>> {
    for member in members {
        if member.id() == id {
            return Some(Vec::new());
        }
        if let Some(mut path) = ancestors_of(member.children(), id) {
            path.insert(0, member.id());
            return Some(path);
        }
    }
    None
}

pub(crate) fn visit<'a>(members: &'a [StructureMember], out: &mut Vec<&'a StructureMember>) {
    for member in members {
        out.push(member);
        visit(member.children(), out);
    }
}
