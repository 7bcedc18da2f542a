mod common;

use std::collections::HashSet;
use std::io::Write;

use common::*;
use graphconv::graphconv_ir::{
    AttributeValue, Attributes, CompareOptions, Composer, DiagnosticKind, ElementType, IrGraph,
    OpKind, Shape, TensorData, TensorType, compare,
};
use graphconv::protos::onnx::tensor_proto::DataType;
use graphconv::{
    ConversionError, ConversionRequest, ExampleInput, InputOverride, ModelSource, Stage, convert,
};
use half::f16;
use insta::assert_snapshot;

fn leaky_elu_model() -> Vec<u8> {
    OnnxModel::new("leaky_elu")
        .input(value_info("x", DataType::FLOAT, Some(&[2, 3, 4])))
        .output(value_info("y", DataType::FLOAT, Some(&[2, 3, 4])))
        .node(with_attr(
            node("leaky", "LeakyRelu", &["x"], &["l"]),
            float_attr("alpha", 0.1),
        ))
        .node(with_attr(
            node("elu", "Elu", &["l"], &["y"]),
            float_attr("alpha", 0.1),
        ))
        .to_bytes()
}

fn expected_leaky_elu() -> IrGraph {
    let mut c = Composer::new("expected");
    let x = c.parameter(ElementType::Float32, [2, 3, 4]);
    let slope = c.constant(TensorData::new(vec![f16::from_f32(0.1)], vec![1]));
    let slope = c.convert(slope, ElementType::Float32);
    let prelu = c.elementwise(OpKind::PRelu, &[x, slope], Attributes::new());
    let elu = c.unary_with(
        OpKind::Elu,
        prelu,
        Attributes::from([("alpha".to_string(), AttributeValue::Float32(0.1))]),
    );
    c.result(elu);
    c.finish().unwrap()
}

#[test]
fn leaky_relu_then_elu_matches_reference() {
    let graph = convert(ConversionRequest::new(leaky_elu_model())).unwrap();

    compare(&graph, &expected_leaky_elu(), CompareOptions::default()).unwrap();
    assert_eq!(
        graph.result_types(),
        vec![&TensorType::new(ElementType::Float32, [2, 3, 4])]
    );
    assert!(graph.diagnostics().is_empty());
}

#[test]
fn decompositions_do_not_share_internal_names() {
    let bytes = OnnxModel::new("twice")
        .input(value_info("x", DataType::FLOAT, Some(&[4])))
        .output(value_info("z", DataType::FLOAT, Some(&[4])))
        .node(with_attr(
            node("a", "LeakyRelu", &["x"], &["y"]),
            float_attr("alpha", 0.2),
        ))
        .node(with_attr(
            node("b", "LeakyRelu", &["y"], &["z"]),
            float_attr("alpha", 0.3),
        ))
        .to_bytes();

    let graph = convert(ConversionRequest::new(bytes)).unwrap();

    assert_eq!(graph.nodes_of(OpKind::Constant).count(), 2);
    assert_eq!(graph.nodes_of(OpKind::Convert).count(), 2);
    assert_eq!(graph.nodes_of(OpKind::PRelu).count(), 2);

    let mut names = HashSet::new();
    for node in graph.nodes() {
        assert!(names.insert(node.name.clone()), "duplicate node name {}", node.name);
    }
}

#[test]
fn renamed_duplicate_nodes_skip_taken_names() {
    let bytes = OnnxModel::new("dup")
        .input(value_info("x", DataType::FLOAT, Some(&[4])))
        .output(value_info("y", DataType::FLOAT, Some(&[4])))
        .node(node("a", "Relu", &["x"], &["r"]))
        .node(node("a_2", "Sigmoid", &["r"], &["s"]))
        .node(node("a", "Tanh", &["s"], &["y"]))
        .to_bytes();

    let graph = convert(ConversionRequest::new(bytes)).unwrap();

    assert_eq!(graph.find_node("a").unwrap().op, OpKind::Relu);
    assert_eq!(graph.find_node("a_2").unwrap().op, OpKind::Sigmoid);
    assert_eq!(graph.find_node("a_3").unwrap().op, OpKind::Tanh);
}

#[test]
fn unsupported_operator_is_reported_with_its_node() {
    let bytes = OnnxModel::new("gelu")
        .input(value_info("x", DataType::FLOAT, Some(&[4])))
        .output(value_info("y", DataType::FLOAT, Some(&[4])))
        .node(node("gelu_0", "Gelu", &["x"], &["y"]))
        .to_bytes();

    match convert(ConversionRequest::new(bytes)) {
        Err(err @ ConversionError::UnsupportedOperator { .. }) => {
            assert_eq!(err.stage(), Stage::Map);
            assert_eq!(
                err.to_string(),
                "unsupported operator `Gelu` in node `gelu_0`"
            );
        }
        other => panic!("expected an unsupported operator, got {other:?}"),
    }
}

#[test]
fn unknown_input_type_defaults_to_f32() {
    let bytes = OnnxModel::new("untyped")
        .input(value_info("x", DataType::UNDEFINED, Some(&[2, 2])))
        .output(value_info("y", DataType::UNDEFINED, None))
        .node(node("relu", "Relu", &["x"], &["y"]))
        .to_bytes();

    let graph = convert(ConversionRequest::new(bytes)).unwrap();

    assert_eq!(
        graph.parameter_types(),
        vec![&TensorType::new(ElementType::Float32, [2, 2])]
    );
    assert!(graph.diagnostics().iter().any(|d| d.tensor == "x"
        && d.kind == DiagnosticKind::DefaultedElementType(ElementType::Float32)));
}

#[test]
fn input_override_changes_shape() {
    let bytes = OnnxModel::new("dynamic")
        .input(value_info("x", DataType::FLOAT, Some(&[-1, 3])))
        .output(value_info("y", DataType::FLOAT, None))
        .node(node("sigmoid", "Sigmoid", &["x"], &["y"]))
        .to_bytes();

    let dynamic = convert(ConversionRequest::new(bytes.clone())).unwrap();
    assert_eq!(
        dynamic.result_types(),
        vec![&TensorType::new(ElementType::Float32, Shape::from_signed(&[-1, 3]))]
    );

    let request = ConversionRequest::new(bytes).input("x[8,3]".parse::<InputOverride>().unwrap());
    let fixed = convert(request).unwrap();
    assert_eq!(
        fixed.result_types(),
        vec![&TensorType::new(ElementType::Float32, [8, 3])]
    );
}

#[test]
fn cast_identity_and_initializers() {
    let bytes = OnnxModel::new("cast")
        .input(value_info("x", DataType::FLOAT, Some(&[3])))
        .output(value_info("y", DataType::DOUBLE, Some(&[3])))
        .initializer(f32_initializer("bias", &[3], &[1.0, 2.0, 3.0]))
        .node(node("add", "Add", &["x", "bias"], &["s"]))
        .node(node("id", "Identity", &["s"], &["i"]))
        .node(with_attr(
            node("cast", "Cast", &["i"], &["y"]),
            int_attr("to", DataType::DOUBLE as i64),
        ))
        .to_bytes();

    let graph = convert(ConversionRequest::new(bytes)).unwrap();

    let convert_node = graph.find_node("cast").unwrap();
    assert_eq!(convert_node.op, OpKind::Convert);
    assert_eq!(
        convert_node.attrs.get("destination_type"),
        Some(&AttributeValue::ElementType(ElementType::Float64))
    );
    assert_eq!(graph.producer(convert_node, 0).unwrap().op, OpKind::Add);

    let bias = graph.find_node("bias").unwrap();
    assert_eq!(bias.op, OpKind::Constant);
    assert_eq!(
        graph.result_types(),
        vec![&TensorType::new(ElementType::Float64, [3])]
    );
}

#[test]
fn example_inputs_are_ignored_with_a_diagnostic() {
    let request = ConversionRequest::new(leaky_elu_model())
        .example_input(TensorData::new(vec![0.0f32; 24], vec![2, 3, 4]));

    let graph = convert(request).unwrap();
    assert_eq!(graph.diagnostics().len(), 1);
    assert_eq!(graph.diagnostics()[0].kind, DiagnosticKind::IgnoredExampleInput);
    assert!(matches!(
        ExampleInput::from(TensorData::scalar(ElementType::Float32, 0.0)),
        ExampleInput::Tensor { name: None, .. }
    ));
}

#[test]
fn model_is_read_from_a_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&leaky_elu_model()).unwrap();

    let graph = convert(ConversionRequest::new(file.path())).unwrap();
    compare(&graph, &expected_leaky_elu(), CompareOptions::default()).unwrap();
}

#[test]
fn model_is_read_from_a_reader() {
    let bytes = leaky_elu_model();
    let source = ModelSource::from_reader(bytes.as_slice()).unwrap();

    let graph = convert(ConversionRequest::new(source)).unwrap();
    assert_eq!(graph.nodes_of(OpKind::PRelu).count(), 1);
}

#[test]
fn garbage_is_an_unsupported_format() {
    let err = convert(ConversionRequest::new(b"definitely not a model".to_vec())).unwrap_err();
    assert!(matches!(err, ConversionError::UnsupportedFormat(_)));
    assert_eq!(err.stage(), Stage::Read);
}

#[test]
fn oversized_initializer_is_malformed() {
    let bytes = OnnxModel::new("huge")
        .input(value_info("x", DataType::FLOAT, Some(&[4])))
        .output(value_info("y", DataType::FLOAT, None))
        .initializer(f32_initializer("w", &[1 << 62, 4], &[]))
        .node(node("add", "Add", &["x", "w"], &["y"]))
        .to_bytes();

    let err = convert(ConversionRequest::new(bytes)).unwrap_err();
    assert!(matches!(
        err,
        ConversionError::MalformedModel { ref location, .. } if location == "w"
    ));
    assert_eq!(err.stage(), Stage::Read);
}

#[test]
fn requested_outputs_select_results() {
    let request = ConversionRequest::new(leaky_elu_model())
        .output("l")
        .output("y");

    let graph = convert(request).unwrap();
    let results: Vec<&str> = graph.results().map(|node| node.name.as_str()).collect();
    assert_eq!(results, vec!["l/result", "y/result"]);
}

#[test]
fn graph_dump() {
    let bytes = OnnxModel::new("relu_add")
        .input(value_info("x", DataType::FLOAT, Some(&[2, 3])))
        .output(value_info("y", DataType::FLOAT, Some(&[2, 3])))
        .initializer(f32_initializer("b", &[3], &[1.0, 2.0, 3.0]))
        .node(node("relu", "Relu", &["x"], &["r"]))
        .node(node("add", "Add", &["r", "b"], &["y"]))
        .to_bytes();

    let graph = convert(ConversionRequest::new(bytes)).unwrap();
    assert_snapshot!(graph.to_string(), @r"
    graph relu_add {
      %0 = Parameter() : f32[2,3]
      %1 = Relu(%0) : f32[2,3]
      %2 = Constant() {value: f32[3] [1, 2, 3]} : f32[3]
      %3 = Add(%1, %2) : f32[2,3]
      Result(%3)
    }
    ");
}
