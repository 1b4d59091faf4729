// SPDX-License-Identifier: GPL-3.0

//! Storage overrides.
//!
//! Overrides arrive as JSON in one of two forms.
//!
//! Raw key/value pairs, applied as-is (`null` deletes the key):
//!
//! ```json
//! [["0x26aa394eea5630e07c48ae0c9558cef702a5c1b19ab7a04f536c519aca4983ac", "0x01000000"]]
//! ```
//!
//! Or a nested document of pallet, storage item and value, encoded against the runtime
//! metadata of the target block:
//!
//! ```json
//! {
//!   "System": {
//!     "Number": 1000,
//!     "Account": [[["5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"], { "providers": 1, "data": { "free": "1000000000000000" } }]],
//!     "$removePrefix": ["BlockHash"]
//!   }
//! }
//! ```
//!
//! Map entries are `[keys, value]` pairs where `keys` lists one value per hasher.
//! `$removePrefix` deletes every key under the listed items. Pallet, item and field
//! names match case-insensitively, ignoring underscores.

use crate::{block::Block, error::OverrideError, storage::storage_value_key, strings};
use scale_info::{PortableRegistry, TypeDef, TypeDefPrimitive, form::PortableForm};
use scale_value::{
	Value,
	stringify::{custom_parsers, from_str_custom},
};
use serde_json::Value as Json;
use subxt::{
	Metadata,
	metadata::types::{StorageEntryType, StorageHasher},
};

/// Raw writes produced from an override document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOverrides {
	/// Keys to write, `None` deleting the key.
	pub entries: Vec<(Vec<u8>, Option<Vec<u8>>)>,
	/// Prefixes whose keys are all deleted. Applied before `entries`.
	pub removed_prefixes: Vec<Vec<u8>>,
}

impl StorageOverrides {
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty() && self.removed_prefixes.is_empty()
	}

	/// Whether applying these overrides replaces the runtime code.
	pub fn touches_code(&self) -> bool {
		let code = strings::rpc::storage_keys::CODE;
		self.entries.iter().any(|(key, _)| key.as_slice() == code) ||
			self.removed_prefixes.iter().any(|prefix| code.starts_with(prefix))
	}
}

/// Translate `overrides` into raw writes, using the metadata of `block` for the
/// nested form.
pub async fn resolve_at(overrides: &Json, block: &Block) -> Result<StorageOverrides, OverrideError> {
	if let Json::Array(_) = overrides {
		return parse_raw(overrides);
	}
	let metadata = block.metadata().await?;
	resolve(overrides, &metadata)
}

/// Translate `overrides` into raw writes.
pub fn resolve(overrides: &Json, metadata: &Metadata) -> Result<StorageOverrides, OverrideError> {
	match overrides {
		Json::Array(_) => parse_raw(overrides),
		Json::Object(pallets) => {
			let mut resolved = StorageOverrides::default();
			for (pallet, items) in pallets {
				resolve_pallet(pallet, items, metadata, &mut resolved)?;
			}
			Ok(resolved)
		},
		other => Err(OverrideError::Malformed(format!("expected an array or object, got {other}"))),
	}
}

/// Parse `[[hexKey, hexValue | null], ...]`.
pub fn parse_raw(overrides: &Json) -> Result<StorageOverrides, OverrideError> {
	let Json::Array(pairs) = overrides else {
		return Err(OverrideError::Malformed("expected an array of [key, value] pairs".into()));
	};
	let entries = pairs
		.iter()
		.map(|pair| match pair.as_array().map(Vec::as_slice) {
			Some([Json::String(key), Json::Null]) => Ok((decode_hex(key)?, None)),
			Some([Json::String(key), Json::String(value)]) =>
				Ok((decode_hex(key)?, Some(decode_hex(value)?))),
			_ => Err(OverrideError::Malformed(format!("expected [key, value], got {pair}"))),
		})
		.collect::<Result<_, _>>()?;
	Ok(StorageOverrides { entries, removed_prefixes: Vec::new() })
}

fn resolve_pallet(
	pallet_name: &str,
	items: &Json,
	metadata: &Metadata,
	resolved: &mut StorageOverrides,
) -> Result<(), OverrideError> {
	let pallet = metadata
		.pallets()
		.find(|p| names_match(p.name(), pallet_name))
		.ok_or_else(|| OverrideError::UnknownPallet(pallet_name.to_string()))?;
	let storage = pallet
		.storage()
		.ok_or_else(|| OverrideError::UnknownPallet(pallet_name.to_string()))?;
	let Json::Object(items) = items else {
		return Err(OverrideError::Malformed(format!("`{pallet_name}` must map items to values")));
	};

	let unknown = |item: &str| OverrideError::UnknownStorage {
		pallet: pallet_name.to_string(),
		item: item.to_string(),
	};
	let find = |item: &str| {
		storage.entries().iter().find(|e| names_match(e.name(), item)).ok_or_else(|| unknown(item))
	};

	for (item, value) in items {
		if item == strings::overrides::REMOVE_PREFIX {
			let Json::Array(names) = value else {
				return Err(OverrideError::Malformed(format!(
					"`{}` expects a list of item names",
					strings::overrides::REMOVE_PREFIX
				)));
			};
			for name in names {
				let name = name.as_str().ok_or_else(|| {
					OverrideError::Malformed(format!("item name expected, got {name}"))
				})?;
				let entry = find(name)?;
				resolved
					.removed_prefixes
					.push(storage_value_key(pallet.name().as_bytes(), entry.name().as_bytes()));
			}
			continue;
		}

		let entry = find(item)?;
		let prefix = storage_value_key(pallet.name().as_bytes(), entry.name().as_bytes());
		let label = format!("{}::{}", pallet.name(), entry.name());
		let types = metadata.types();
		match entry.entry_type() {
			StorageEntryType::Plain(value_ty) => {
				let value = encode_optional(value, *value_ty, types, &label)?;
				resolved.entries.push((prefix, value));
			},
			StorageEntryType::Map { hashers, key_ty, value_ty } => {
				let Json::Array(pairs) = value else {
					return Err(OverrideError::InvalidValue {
						item: label,
						message: "map overrides must be a list of [keys, value] pairs".into(),
					});
				};
				for pair in pairs {
					let Some([keys, value]) = pair.as_array().map(Vec::as_slice) else {
						return Err(OverrideError::InvalidValue {
							item: label,
							message: format!("expected [keys, value], got {pair}"),
						});
					};
					let mut key = prefix.clone();
					key.extend(map_key_suffix(keys, hashers, *key_ty, types, &label)?);
					resolved.entries.push((key, encode_optional(value, *value_ty, types, &label)?));
				}
			},
		}
	}
	Ok(())
}

/// Hashed key parts of a map entry, one per hasher.
fn map_key_suffix(
	keys: &Json,
	hashers: &[StorageHasher],
	key_ty: u32,
	types: &PortableRegistry,
	item: &str,
) -> Result<Vec<u8>, OverrideError> {
	let invalid = |message: String| OverrideError::InvalidValue { item: item.to_string(), message };

	// A single-hasher map takes either `[key]` or the key itself.
	let parts: Vec<(&Json, u32)> = if hashers.len() == 1 {
		let key = match keys {
			Json::Array(parts) if parts.len() == 1 => &parts[0],
			key => key,
		};
		vec![(key, key_ty)]
	} else {
		let ty = types.resolve(key_ty).ok_or_else(|| invalid(format!("unknown type {key_ty}")))?;
		let TypeDef::Tuple(tuple) = &ty.type_def else {
			return Err(invalid("multi-key map without a tuple key type".into()));
		};
		let Json::Array(parts) = keys else {
			return Err(invalid(format!("expected {} keys, got {keys}", hashers.len())));
		};
		if parts.len() != hashers.len() || tuple.fields.len() != hashers.len() {
			return Err(invalid(format!("expected {} keys, got {}", hashers.len(), parts.len())));
		}
		parts.iter().zip(tuple.fields.iter().map(|f| f.id)).collect()
	};

	let mut suffix = Vec::new();
	for ((key, ty), hasher) in parts.into_iter().zip(hashers) {
		let encoded = encode_json(key, ty, types, item)?;
		suffix.extend(hash_key(hasher, &encoded));
	}
	Ok(suffix)
}

fn hash_key(hasher: &StorageHasher, encoded: &[u8]) -> Vec<u8> {
	match hasher {
		StorageHasher::Blake2_128 => sp_core::blake2_128(encoded).to_vec(),
		StorageHasher::Blake2_256 => sp_core::blake2_256(encoded).to_vec(),
		StorageHasher::Blake2_128Concat => [&sp_core::blake2_128(encoded)[..], encoded].concat(),
		StorageHasher::Twox128 => sp_core::twox_128(encoded).to_vec(),
		StorageHasher::Twox256 => sp_core::twox_256(encoded).to_vec(),
		StorageHasher::Twox64Concat => [&sp_core::twox_64(encoded)[..], encoded].concat(),
		StorageHasher::Identity => encoded.to_vec(),
	}
}

fn encode_optional(
	json: &Json,
	type_id: u32,
	types: &PortableRegistry,
	item: &str,
) -> Result<Option<Vec<u8>>, OverrideError> {
	match json {
		Json::Null => Ok(None),
		json => encode_json(json, type_id, types, item).map(Some),
	}
}

/// SCALE encode `json` as the type `type_id`.
pub fn encode_json(
	json: &Json,
	type_id: u32,
	types: &PortableRegistry,
	item: &str,
) -> Result<Vec<u8>, OverrideError> {
	let invalid = |message: String| OverrideError::InvalidValue { item: item.to_string(), message };
	// Raw hex is taken as the already encoded value.
	if let Json::String(s) = json &&
		s.starts_with("0x") &&
		!is_byte_sequence(type_id, types)
	{
		return decode_hex(s);
	}
	let value = json_to_value(json, type_id, types).map_err(invalid)?;
	let mut encoded = Vec::new();
	scale_value::scale::encode_as_type(&value, type_id, types, &mut encoded)
		.map_err(|e| invalid(e.to_string()))?;
	Ok(encoded)
}

const NULL: &Json = &Json::Null;

/// Convert `json` into a value shaped like the type `type_id`.
fn json_to_value(json: &Json, type_id: u32, types: &PortableRegistry) -> Result<Value, String> {
	let ty = types.resolve(type_id).ok_or_else(|| format!("unknown type {type_id}"))?;
	match &ty.type_def {
		TypeDef::Composite(composite) => {
			let fields = &composite.fields;
			match json {
				Json::Object(object) if fields.iter().all(|f| f.name.is_some()) => {
					let values = fields
						.iter()
						.map(|field| {
							let name = field.name.as_deref().unwrap_or_default();
							let (_, value) = object
								.iter()
								.find(|(key, _)| names_match(key, name))
								.ok_or_else(|| format!("missing field `{name}`"))?;
							Ok((name.to_string(), json_to_value(value, field.ty.id, types)?))
						})
						.collect::<Result<Vec<_>, String>>()?;
					Ok(Value::named_composite(values))
				},
				// Newtypes take their inner value directly.
				json if fields.len() == 1 => {
					let inner = json_to_value(json, fields[0].ty.id, types)?;
					Ok(match &fields[0].name {
						Some(name) => Value::named_composite([(name.clone(), inner)]),
						None => Value::unnamed_composite([inner]),
					})
				},
				Json::Array(items) if items.len() == fields.len() => Ok(Value::unnamed_composite(
					items
						.iter()
						.zip(fields)
						.map(|(item, field)| json_to_value(item, field.ty.id, types))
						.collect::<Result<Vec<_>, _>>()?,
				)),
				Json::Null if fields.is_empty() => Ok(Value::unnamed_composite([])),
				other => Err(format!("cannot convert {other} to {}", type_name(ty))),
			}
		},
		TypeDef::Variant(variants) => {
			let (name, fields_json) = match json {
				Json::String(name) => (name.as_str(), NULL),
				Json::Object(object) if object.len() == 1 =>
					object.iter().next().map(|(k, v)| (k.as_str(), v)).ok_or("empty variant")?,
				// `Option<T>` from a bare value.
				other if is_option(ty) => ("Some", other),
				other => return Err(format!("cannot convert {other} to {}", type_name(ty))),
			};
			let variant = variants
				.variants
				.iter()
				.find(|v| names_match(&v.name, name))
				.ok_or_else(|| format!("unknown variant `{name}` of {}", type_name(ty)))?;
			let fields = &variant.fields;
			if fields.iter().all(|f| f.name.is_some()) && !fields.is_empty() {
				let Json::Object(object) = fields_json else {
					return Err(format!("variant `{name}` expects named fields"));
				};
				let values = fields
					.iter()
					.map(|field| {
						let field_name = field.name.as_deref().unwrap_or_default();
						let (_, value) = object
							.iter()
							.find(|(key, _)| names_match(key, field_name))
							.ok_or_else(|| format!("missing field `{field_name}`"))?;
						Ok((field_name.to_string(), json_to_value(value, field.ty.id, types)?))
					})
					.collect::<Result<Vec<_>, String>>()?;
				return Ok(Value::named_variant(variant.name.clone(), values));
			}
			let values = match (fields.len(), fields_json) {
				(0, _) => Vec::new(),
				(1, json) => vec![json_to_value(json, fields[0].ty.id, types)?],
				(n, Json::Array(items)) if items.len() == n => items
					.iter()
					.zip(fields)
					.map(|(item, field)| json_to_value(item, field.ty.id, types))
					.collect::<Result<_, _>>()?,
				(n, other) => return Err(format!("variant `{name}` expects {n} fields, got {other}")),
			};
			Ok(Value::unnamed_variant(variant.name.clone(), values))
		},
		TypeDef::Sequence(seq) => sequence_to_value(json, seq.type_param.id, None, types),
		TypeDef::Array(array) =>
			sequence_to_value(json, array.type_param.id, Some(array.len as usize), types),
		TypeDef::Tuple(tuple) => match json {
			Json::Null if tuple.fields.is_empty() => Ok(Value::unnamed_composite([])),
			Json::Array(items) if items.len() == tuple.fields.len() => Ok(Value::unnamed_composite(
				items
					.iter()
					.zip(&tuple.fields)
					.map(|(item, field)| json_to_value(item, field.id, types))
					.collect::<Result<Vec<_>, _>>()?,
			)),
			other => Err(format!("expected a {}-tuple, got {other}", tuple.fields.len())),
		},
		TypeDef::Primitive(primitive) => primitive_to_value(json, primitive),
		TypeDef::Compact(compact) => json_to_value(json, compact.type_param.id, types),
		TypeDef::BitSequence(_) => Err("bit sequences are not supported".into()),
	}
}

fn sequence_to_value(
	json: &Json,
	element: u32,
	len: Option<usize>,
	types: &PortableRegistry,
) -> Result<Value, String> {
	let bytes = match json {
		Json::Array(items) =>
			return Ok(Value::unnamed_composite(
				items.iter().map(|item| json_to_value(item, element, types)).collect::<Result<
					Vec<_>,
					_,
				>>()?,
			)),
		Json::String(s) if s.starts_with("0x") =>
			hex::decode(s.trim_start_matches("0x")).map_err(|e| format!("invalid hex: {e}"))?,
		// 32 byte arrays may be given as SS58 addresses.
		Json::String(s) if len == Some(32) => match from_str_custom()
			.add_custom_parser(custom_parsers::parse_ss58)
			.parse(s)
		{
			(Ok(value), rest) if rest.is_empty() => return Ok(value),
			_ => s.as_bytes().to_vec(),
		},
		Json::String(s) => s.as_bytes().to_vec(),
		other => return Err(format!("cannot convert {other} to a sequence")),
	};
	if !is_u8(element, types) {
		return Err("byte strings only convert to byte sequences".into());
	}
	if let Some(len) = len &&
		len != bytes.len()
	{
		return Err(format!("expected {len} bytes, got {}", bytes.len()));
	}
	Ok(Value::from_bytes(bytes))
}

fn primitive_to_value(json: &Json, primitive: &TypeDefPrimitive) -> Result<Value, String> {
	use TypeDefPrimitive::*;
	match primitive {
		Bool => json.as_bool().map(Value::bool).ok_or_else(|| format!("expected a bool, got {json}")),
		Str => json
			.as_str()
			.map(Value::string)
			.ok_or_else(|| format!("expected a string, got {json}")),
		Char => json
			.as_str()
			.and_then(|s| s.chars().next())
			.map(Value::char)
			.ok_or_else(|| format!("expected a char, got {json}")),
		U8 | U16 | U32 | U64 | U128 => match json {
			Json::Number(n) => n.as_u64().map(|n| Value::u128(n.into())),
			Json::String(s) => s.parse::<u128>().ok().map(Value::u128),
			_ => None,
		}
		.ok_or_else(|| format!("expected an unsigned integer, got {json}")),
		I8 | I16 | I32 | I64 | I128 => match json {
			Json::Number(n) => n.as_i64().map(|n| Value::i128(n.into())),
			Json::String(s) => s.parse::<i128>().ok().map(Value::i128),
			_ => None,
		}
		.ok_or_else(|| format!("expected an integer, got {json}")),
		U256 | I256 => Err("256-bit integers are not supported".into()),
	}
}

fn is_u8(type_id: u32, types: &PortableRegistry) -> bool {
	matches!(
		types.resolve(type_id).map(|ty| &ty.type_def),
		Some(TypeDef::Primitive(TypeDefPrimitive::U8))
	)
}

/// Whether hex given for `type_id` spells the bytes of the value rather than its encoding.
fn is_byte_sequence(type_id: u32, types: &PortableRegistry) -> bool {
	match types.resolve(type_id).map(|ty| &ty.type_def) {
		Some(TypeDef::Sequence(seq)) => is_u8(seq.type_param.id, types),
		Some(TypeDef::Array(array)) => is_u8(array.type_param.id, types),
		Some(TypeDef::Composite(composite)) if composite.fields.len() == 1 =>
			is_byte_sequence(composite.fields[0].ty.id, types),
		_ => false,
	}
}

fn is_option(ty: &scale_info::Type<PortableForm>) -> bool {
	ty.path.segments.last().is_some_and(|s| s == "Option")
}

fn type_name(ty: &scale_info::Type<PortableForm>) -> String {
	if ty.path.segments.is_empty() { "value".into() } else { ty.path.segments.join("::") }
}

fn names_match(a: &str, b: &str) -> bool {
	let normalize = |s: &str| s.chars().filter(|c| *c != '_').collect::<String>().to_lowercase();
	normalize(a) == normalize(b)
}

fn decode_hex(s: &str) -> Result<Vec<u8>, OverrideError> {
	hex::decode(s.trim_start_matches("0x")).map_err(|_| OverrideError::Hex(s.to_string()))
}
