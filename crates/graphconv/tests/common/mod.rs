#![allow(dead_code)]

use graphconv::protos::onnx::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto, attribute_proto::AttributeType,
    tensor_proto::DataType, tensor_shape_proto, type_proto,
};
use protobuf::{EnumOrUnknown, Message, MessageField};

/// Declared graph input or output. `None` leaves the shape out entirely.
pub fn value_info(name: &str, elem_type: DataType, dims: Option<&[i64]>) -> ValueInfoProto {
    let mut tensor = type_proto::Tensor::new();
    tensor.elem_type = elem_type as i32;
    if let Some(dims) = dims {
        let mut shape = TensorShapeProto::new();
        for dim in dims {
            let mut d = tensor_shape_proto::Dimension::new();
            if *dim < 0 {
                d.set_dim_param("N".into());
            } else {
                d.set_dim_value(*dim);
            }
            shape.dim.push(d);
        }
        tensor.shape = MessageField::some(shape);
    }

    let mut ty = TypeProto::new();
    ty.set_tensor_type(tensor);

    let mut info = ValueInfoProto::new();
    info.name = name.to_string();
    info.type_ = MessageField::some(ty);
    info
}

pub fn node(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> NodeProto {
    let mut node = NodeProto::new();
    node.name = name.to_string();
    node.op_type = op_type.to_string();
    node.input = inputs.iter().map(|s| s.to_string()).collect();
    node.output = outputs.iter().map(|s| s.to_string()).collect();
    node
}

pub fn float_attr(name: &str, value: f32) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = EnumOrUnknown::new(AttributeType::FLOAT);
    attr.f = value;
    attr
}

pub fn int_attr(name: &str, value: i64) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = EnumOrUnknown::new(AttributeType::INT);
    attr.i = value;
    attr
}

pub fn with_attr(mut node: NodeProto, attr: AttributeProto) -> NodeProto {
    node.attribute.push(attr);
    node
}

pub fn f32_initializer(name: &str, dims: &[i64], values: &[f32]) -> TensorProto {
    let mut tensor = TensorProto::new();
    tensor.name = name.to_string();
    tensor.dims = dims.to_vec();
    tensor.data_type = DataType::FLOAT as i32;
    tensor.float_data = values.to_vec();
    tensor
}

/// Assembles a model importing the default operator set at version 13.
#[derive(Debug, Default)]
pub struct OnnxModel {
    graph: GraphProto,
}

impl OnnxModel {
    pub fn new(name: &str) -> Self {
        let mut graph = GraphProto::new();
        graph.name = name.to_string();
        Self { graph }
    }

    pub fn input(mut self, info: ValueInfoProto) -> Self {
        self.graph.input.push(info);
        self
    }

    pub fn output(mut self, info: ValueInfoProto) -> Self {
        self.graph.output.push(info);
        self
    }

    pub fn node(mut self, node: NodeProto) -> Self {
        self.graph.node.push(node);
        self
    }

    pub fn initializer(mut self, tensor: TensorProto) -> Self {
        self.graph.initializer.push(tensor);
        self
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut opset = OperatorSetIdProto::new();
        opset.version = 13;

        let mut model = ModelProto::new();
        model.ir_version = 8;
        model.producer_name = "graphconv-tests".to_string();
        model.opset_import.push(opset);
        model.graph = MessageField::some(self.graph);
        model.write_to_bytes().expect("model serializes")
    }
}
