use std::collections::{HashMap, HashSet};

use graphconv_ir::{AttributeValue, Attributes, Dim, ElementType, Shape, TensorData};
use protobuf::{EnumOrUnknown, Message, MessageField};

use crate::protos::paddle::{
    AttrType, BlockDesc, OpDesc as OpProto, ProgramDesc, VarDesc as VarProto, VarType, op_desc,
    var_type,
};
use crate::{ConversionError, DeclaredTensor, ForeignGraph, ForeignNode, Framework, Stage};

use super::{dtype_code, element_type_from_code};

/// Input slots in the order their arguments become node inputs.
const INPUT_SLOTS: [&str; 7] = ["X", "Input", "Y", "Alpha", "ScaleTensor", "Min", "Max"];
const OUTPUT_SLOTS: [&str; 2] = ["Out", "Output"];

const FEED: &str = "feed";
const FETCH: &str = "fetch";

fn malformed(location: &str, reason: impl Into<String>) -> ConversionError {
    ConversionError::malformed(Stage::Read, location, reason)
}

/// Handle to a program variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub dtype: ElementType,
    pub shape: Vec<i64>,
}

/// A dense tensor variable of the global block.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDesc {
    pub name: String,
    pub dtype: ElementType,
    /// Negative entries are dynamic.
    pub shape: Vec<i64>,
    pub persistable: bool,
    /// Set on `static.data` variables; the fed tensor must keep the declared rank.
    pub need_check_feed: bool,
    /// Known value of a persistable variable.
    pub value: Option<TensorData>,
}

impl VarDesc {
    fn handle(&self) -> Var {
        Var {
            name: self.name.clone(),
            dtype: self.dtype,
            shape: self.shape.clone(),
        }
    }

    fn declared(&self) -> DeclaredTensor {
        DeclaredTensor::new(
            self.name.as_str(),
            Some(self.dtype),
            Some(Shape::from_signed(&self.shape)),
        )
    }
}

/// One operator of the global block, with arguments grouped by slot.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDesc {
    pub op_type: String,
    pub inputs: Vec<(String, Vec<String>)>,
    pub outputs: Vec<(String, Vec<String>)>,
    pub attrs: Attributes,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: Attributes::new(),
        }
    }

    pub fn input(mut self, slot: &str, args: &[&Var]) -> Self {
        self.inputs
            .push((slot.to_string(), args.iter().map(|v| v.name.clone()).collect()));
        self
    }

    pub fn output(mut self, slot: &str, args: &[&Var]) -> Self {
        self.outputs
            .push((slot.to_string(), args.iter().map(|v| v.name.clone()).collect()));
        self
    }

    pub fn attr(mut self, key: &str, value: AttributeValue) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    fn args<'a>(slots: &'a [(String, Vec<String>)], slot: &str) -> Option<&'a [String]> {
        slots
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, args)| args.as_slice())
    }

    fn ordered(slots: &[(String, Vec<String>)], order: &[&str]) -> Vec<String> {
        let mut ordered: Vec<&(String, Vec<String>)> = slots.iter().collect();
        ordered.sort_by_key(|(slot, _)| {
            (
                order.iter().position(|o| o == slot).unwrap_or(order.len()),
                slot.clone(),
            )
        });
        ordered
            .into_iter()
            .flat_map(|(_, args)| args.iter().cloned())
            .collect()
    }

    fn col(&self) -> i64 {
        self.attrs
            .get("col")
            .and_then(AttributeValue::as_i64)
            .unwrap_or_default()
    }
}

/// Static-mode program: the global block of a Paddle `ProgramDesc`.
#[derive(Debug, Clone, Default)]
pub struct Program {
    name: String,
    vars: Vec<VarDesc>,
    ops: Vec<OpDesc>,
    counters: HashMap<String, usize>,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vars(&self) -> &[VarDesc] {
        &self.vars
    }

    pub fn ops(&self) -> &[OpDesc] {
        &self.ops
    }

    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.iter().find(|var| var.name == name)
    }

    /// Declares a fed input whose rank is checked at feed time.
    pub fn data(&mut self, name: &str, shape: &[i64], dtype: ElementType) -> Var {
        self.declare(name, shape, dtype, true)
    }

    /// Declares a fed input without a feed-time check, as traced programs do.
    pub fn unchecked_data(&mut self, name: &str, shape: &[i64], dtype: ElementType) -> Var {
        self.declare(name, shape, dtype, false)
    }

    /// Declares a persistable variable with a known value.
    pub fn parameter(&mut self, name: &str, value: TensorData) -> Var {
        let var = VarDesc {
            name: name.to_string(),
            dtype: value.elem_type(),
            shape: value.shape().iter().map(|&d| d as i64).collect(),
            persistable: true,
            need_check_feed: false,
            value: Some(value),
        };
        let handle = var.handle();
        self.vars.push(var);
        handle
    }

    /// Declares a temporary named after the operator that produces it.
    pub fn create_var(&mut self, op_type: &str, dtype: ElementType, shape: Vec<i64>) -> Var {
        let counter = self.counters.entry(op_type.to_string()).or_default();
        let name = format!("{op_type}_{counter}.tmp_0");
        *counter += 1;

        let var = VarDesc {
            name,
            dtype,
            shape,
            persistable: false,
            need_check_feed: false,
            value: None,
        };
        let handle = var.handle();
        self.vars.push(var);
        handle
    }

    pub fn append_op(&mut self, op: OpDesc) {
        self.ops.push(op);
    }

    /// Appends `op_type(X) -> Out` with an output shaped like `x`.
    pub fn unary(&mut self, op_type: &str, x: &Var, attrs: Attributes) -> Var {
        let out = self.create_var(op_type, x.dtype, x.shape.clone());
        let mut op = OpDesc::new(op_type).input("X", &[x]).output("Out", &[&out]);
        op.attrs = attrs;
        self.append_op(op);
        out
    }

    /// Appends `op_type(X, Y) -> Out` with a broadcast output shape.
    pub fn binary(&mut self, op_type: &str, x: &Var, y: &Var, attrs: Attributes) -> Var {
        let shape = broadcast_signed(&x.shape, &y.shape);
        let out = self.create_var(op_type, x.dtype, shape);
        let mut op = OpDesc::new(op_type)
            .input("X", &[x])
            .input("Y", &[y])
            .output("Out", &[&out]);
        op.attrs = attrs;
        self.append_op(op);
        out
    }

    /// Appends `prelu(X, Alpha) -> Out`.
    pub fn prelu(&mut self, x: &Var, alpha: &Var, mode: &str) -> Var {
        let out = self.create_var("prelu", x.dtype, x.shape.clone());
        self.append_op(
            OpDesc::new("prelu")
                .input("X", &[x])
                .input("Alpha", &[alpha])
                .output("Out", &[&out])
                .attr("mode", AttributeValue::String(mode.to_string())),
        );
        out
    }

    /// Marks `var` as the `col`-th fed input.
    pub fn feed(&mut self, var: &Var, col: usize) {
        let feed = Var {
            name: FEED.to_string(),
            dtype: var.dtype,
            shape: Vec::new(),
        };
        self.append_op(
            OpDesc::new(FEED)
                .input("X", &[&feed])
                .output("Out", &[var])
                .attr("col", AttributeValue::Int64(col as i64)),
        );
    }

    /// Marks `var` as the `col`-th fetched output.
    pub fn fetch(&mut self, var: &Var, col: usize) {
        let fetch = Var {
            name: FETCH.to_string(),
            dtype: var.dtype,
            shape: Vec::new(),
        };
        self.append_op(
            OpDesc::new(FETCH)
                .input("X", &[var])
                .output("Out", &[&fetch])
                .attr("col", AttributeValue::Int64(col as i64)),
        );
    }

    fn declare(&mut self, name: &str, shape: &[i64], dtype: ElementType, checked: bool) -> Var {
        let var = VarDesc {
            name: name.to_string(),
            dtype,
            shape: shape.to_vec(),
            persistable: false,
            need_check_feed: checked,
            value: None,
        };
        let handle = var.handle();
        self.vars.push(var);
        handle
    }

    /// Parses a serialized `ProgramDesc` (`.pdmodel`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConversionError> {
        let desc = ProgramDesc::parse_from_bytes(bytes)
            .map_err(|err| malformed("program", format!("invalid Paddle protobuf: {err}")))?;
        Self::from_proto(&desc)
    }

    /// Reads the global block of `desc`.
    pub fn from_proto(desc: &ProgramDesc) -> Result<Self, ConversionError> {
        let block = desc
            .blocks
            .first()
            .ok_or_else(|| malformed("program", "program has no blocks"))?;
        if desc.blocks.len() > 1 {
            log::warn!(
                "Program has {} blocks, only the global block is read",
                desc.blocks.len()
            );
        }

        let mut program = Program::new("paddle_program");

        for var in &block.vars {
            let Some(type_) = var.type_.as_ref() else {
                return Err(malformed(&var.name, "variable without a type"));
            };
            match type_.type_.enum_value() {
                Ok(var_type::Type::LOD_TENSOR) => {}
                Ok(var_type::Type::FEED_MINIBATCH | var_type::Type::FETCH_LIST) => continue,
                other => {
                    log::debug!("Skipping variable {} of type {other:?}", var.name);
                    continue;
                }
            }

            let tensor = type_
                .lod_tensor
                .as_ref()
                .and_then(|lod| lod.tensor.as_ref())
                .ok_or_else(|| malformed(&var.name, "dense tensor variable without a descriptor"))?;
            let dtype = tensor
                .data_type
                .enum_value()
                .ok()
                .and_then(element_type_from_code)
                .ok_or_else(|| malformed(&var.name, "unsupported element type"))?;

            program.vars.push(VarDesc {
                name: var.name.clone(),
                dtype,
                shape: tensor.dims.clone(),
                persistable: var.persistable,
                need_check_feed: var.need_check_feed,
                value: None,
            });
        }

        for (idx, op) in block.ops.iter().enumerate() {
            if op.type_.is_empty() {
                return Err(malformed(&format!("op #{idx}"), "operator without a type"));
            }
            let slots = |vars: &[op_desc::Var]| {
                vars.iter()
                    .map(|var| (var.parameter.clone(), var.arguments.clone()))
                    .collect::<Vec<_>>()
            };
            let mut attrs = Attributes::new();
            for attr in &op.attrs {
                if let Some(value) = attribute_from_proto(attr) {
                    attrs.insert(attr.name.clone(), value);
                }
            }
            program.ops.push(OpDesc {
                op_type: op.type_.clone(),
                inputs: slots(&op.inputs),
                outputs: slots(&op.outputs),
                attrs,
            });
        }

        Ok(program)
    }

    /// Serializes the program as a single-block `ProgramDesc`.
    ///
    /// Values of persistable variables are not part of the description.
    pub fn to_proto(&self) -> Result<ProgramDesc, ConversionError> {
        let mut block = BlockDesc::new();
        block.idx = 0;
        block.parent_idx = -1;

        for holder in [(FEED, var_type::Type::FEED_MINIBATCH), (FETCH, var_type::Type::FETCH_LIST)] {
            if self.ops.iter().any(|op| op.op_type == holder.0) {
                let mut var_type = VarType::new();
                var_type.type_ = EnumOrUnknown::new(holder.1);
                let mut var = VarProto::new();
                var.name = holder.0.to_string();
                var.type_ = MessageField::some(var_type);
                var.persistable = true;
                block.vars.push(var);
            }
        }

        for var in &self.vars {
            let code = dtype_code(var.dtype)
                .ok_or_else(|| malformed(&var.name, format!("{} has no Paddle encoding", var.dtype)))?;
            let mut tensor = var_type::TensorDesc::new();
            tensor.data_type = EnumOrUnknown::new(code);
            tensor.dims = var.shape.clone();
            let mut lod = var_type::LoDTensorDesc::new();
            lod.tensor = MessageField::some(tensor);
            let mut var_type = VarType::new();
            var_type.type_ = EnumOrUnknown::new(var_type::Type::LOD_TENSOR);
            var_type.lod_tensor = MessageField::some(lod);

            let mut proto = VarProto::new();
            proto.name = var.name.clone();
            proto.type_ = MessageField::some(var_type);
            proto.persistable = var.persistable;
            proto.need_check_feed = var.need_check_feed;
            block.vars.push(proto);
        }

        for op in &self.ops {
            let slots = |slots: &[(String, Vec<String>)]| {
                slots
                    .iter()
                    .map(|(parameter, arguments)| {
                        let mut var = op_desc::Var::new();
                        var.parameter = parameter.clone();
                        var.arguments = arguments.clone();
                        var
                    })
                    .collect::<Vec<_>>()
            };
            let mut proto = OpProto::new();
            proto.type_ = op.op_type.clone();
            proto.inputs = slots(&op.inputs);
            proto.outputs = slots(&op.outputs);
            proto.attrs = op
                .attrs
                .iter()
                .filter_map(|(name, value)| attribute_to_proto(name, value))
                .collect();
            block.ops.push(proto);
        }

        let mut desc = ProgramDesc::new();
        desc.blocks.push(block);
        Ok(desc)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConversionError> {
        self.to_proto()?
            .write_to_bytes()
            .map_err(|err| malformed(&self.name, format!("failed to serialize program: {err}")))
    }

    /// Normalizes the program into a foreign graph.
    ///
    /// `feed`/`fetch` operators, when present, define the input and output order.
    /// Otherwise inputs are the non-persistable variables no operator produces,
    /// and outputs are the produced variables no operator consumes.
    pub fn to_foreign(&self) -> Result<ForeignGraph, ConversionError> {
        let compute: Vec<&OpDesc> = self
            .ops
            .iter()
            .filter(|op| op.op_type != FEED && op.op_type != FETCH)
            .collect();

        let mut produced: HashSet<&str> = HashSet::new();
        let mut consumed: HashSet<&str> = HashSet::new();
        for op in &compute {
            produced.extend(op.outputs.iter().flat_map(|(_, args)| args.iter().map(String::as_str)));
            consumed.extend(op.inputs.iter().flat_map(|(_, args)| args.iter().map(String::as_str)));
        }

        let lookup = |name: &str| {
            self.var(name)
                .ok_or_else(|| malformed(name, "variable is not declared in the global block"))
        };

        let mut feeds = self.slot_args(FEED, false);
        let mut fetches = self.slot_args(FETCH, true);

        let input_names: Vec<String> = if feeds.is_empty() {
            self.vars
                .iter()
                .filter(|var| !var.persistable && !produced.contains(var.name.as_str()))
                .filter(|var| var.need_check_feed || consumed.contains(var.name.as_str()))
                .map(|var| var.name.clone())
                .collect()
        } else {
            feeds.sort_by_key(|(col, _)| *col);
            feeds.into_iter().map(|(_, name)| name).collect()
        };

        let output_names: Vec<String> = if fetches.is_empty() {
            let mut seen = HashSet::new();
            compute
                .iter()
                .flat_map(|op| OpDesc::ordered(&op.outputs, &OUTPUT_SLOTS))
                .filter(|name| !consumed.contains(name.as_str()))
                .filter(|name| seen.insert(name.clone()))
                .collect()
        } else {
            fetches.sort_by_key(|(col, _)| *col);
            fetches.into_iter().map(|(_, name)| name).collect()
        };

        let mut foreign = ForeignGraph::new(Framework::Paddle, self.name.as_str());

        for name in &input_names {
            let var = lookup(name)?;
            let declared = var.declared();
            foreign.inputs.push(if var.need_check_feed {
                declared.rank_fixed()
            } else {
                declared
            });
        }

        for name in &output_names {
            foreign.outputs.push(lookup(name)?.declared());
        }

        for var in self.vars.iter().filter(|var| var.persistable) {
            if !consumed.contains(var.name.as_str()) {
                continue;
            }
            let value = var.value.clone().ok_or_else(|| {
                malformed(
                    &var.name,
                    "persistable variable has no value; parameters are stored outside the program",
                )
            })?;
            foreign.constants.insert(var.name.clone(), value);
        }

        for (idx, op) in self.ops.iter().enumerate() {
            if op.op_type == FEED || op.op_type == FETCH {
                continue;
            }
            foreign.nodes.push(
                ForeignNode::new(
                    format!("{}_{idx}", op.op_type),
                    op.op_type.as_str(),
                    OpDesc::ordered(&op.inputs, &INPUT_SLOTS),
                    OpDesc::ordered(&op.outputs, &OUTPUT_SLOTS),
                )
                .with_attrs(op.attrs.clone()),
            );
        }

        Ok(foreign)
    }

    /// `(col, variable)` pairs of the feed or fetch operators.
    fn slot_args(&self, op_type: &str, from_input: bool) -> Vec<(i64, String)> {
        self.ops
            .iter()
            .filter(|op| op.op_type == op_type)
            .filter_map(|op| {
                let slots = if from_input { &op.inputs } else { &op.outputs };
                let slot = if from_input { "X" } else { "Out" };
                OpDesc::args(slots, slot)
                    .and_then(|args| args.first())
                    .map(|name| (op.col(), name.clone()))
            })
            .collect()
    }
}

fn broadcast_signed(lhs: &[i64], rhs: &[i64]) -> Vec<i64> {
    match Shape::from_signed(lhs).broadcast(&Shape::from_signed(rhs)) {
        Some(Shape::Ranked(dims)) => dims
            .iter()
            .map(|dim| match dim {
                Dim::Static(size) => *size as i64,
                Dim::Dynamic => -1,
            })
            .collect(),
        _ => lhs.to_vec(),
    }
}

fn attribute_from_proto(attr: &op_desc::Attr) -> Option<AttributeValue> {
    let value = match attr.type_.enum_value() {
        Ok(AttrType::INT) => AttributeValue::Int64(attr.i as i64),
        Ok(AttrType::LONG) => AttributeValue::Int64(attr.l),
        Ok(AttrType::FLOAT) => AttributeValue::Float32(attr.f),
        Ok(AttrType::FLOAT64) => AttributeValue::Float64(attr.float64),
        Ok(AttrType::STRING) => AttributeValue::String(attr.s.clone()),
        Ok(AttrType::BOOLEAN) => AttributeValue::Bool(attr.b),
        Ok(AttrType::INTS) => AttributeValue::Int64s(attr.ints.iter().map(|&v| v as i64).collect()),
        Ok(AttrType::LONGS) => AttributeValue::Int64s(attr.longs.clone()),
        Ok(AttrType::FLOATS) => AttributeValue::Float32s(attr.floats.clone()),
        Ok(AttrType::STRINGS) => AttributeValue::Strings(attr.strings.clone()),
        other => {
            log::debug!("Skipping attribute {} of type {other:?}", attr.name);
            return None;
        }
    };
    Some(value)
}

fn attribute_to_proto(name: &str, value: &AttributeValue) -> Option<op_desc::Attr> {
    let mut attr = op_desc::Attr::new();
    attr.name = name.to_string();
    let type_ = match value {
        AttributeValue::Bool(b) => {
            attr.b = *b;
            AttrType::BOOLEAN
        }
        AttributeValue::Float32(f) => {
            attr.f = *f;
            AttrType::FLOAT
        }
        AttributeValue::Float64(f) => {
            attr.float64 = *f;
            AttrType::FLOAT64
        }
        AttributeValue::Int64(v) => match i32::try_from(*v) {
            Ok(i) => {
                attr.i = i;
                AttrType::INT
            }
            Err(_) => {
                attr.l = *v;
                AttrType::LONG
            }
        },
        AttributeValue::Int64s(values) => {
            attr.longs = values.clone();
            AttrType::LONGS
        }
        AttributeValue::Float32s(values) => {
            attr.floats = values.clone();
            AttrType::FLOATS
        }
        AttributeValue::String(s) => {
            attr.s = s.clone();
            AttrType::STRING
        }
        AttributeValue::Strings(values) => {
            attr.strings = values.clone();
            AttrType::STRINGS
        }
        AttributeValue::ElementType(elem_type) => {
            attr.i = dtype_code(*elem_type)? as i32;
            AttrType::INT
        }
        AttributeValue::Tensor(_) => {
            log::debug!("Tensor attribute {name} has no Paddle encoding, dropping it");
            return None;
        }
    };
    attr.type_ = EnumOrUnknown::new(type_);
    Some(attr)
}
