// Communicator objects - message types and the UnityToExternalProto service of the
// ML-Agents Unity protocol, generated by build.rs from the vendored files in `proto/`.

tonic::include_proto!("communicator_objects");

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_agent_info_roundtrip_keeps_observation_oneof() {
        let info = AgentInfoProto {
            reward: 1.5,
            done: true,
            id: 7,
            action_mask: vec![true, false],
            observations: vec![ObservationProto {
                shape: vec![2, 2, 1],
                observation_data: Some(observation_proto::ObservationData::FloatData(
                    observation_proto::FloatData { data: vec![0.0, 0.25, 0.5, 1.0] },
                )),
                ..Default::default()
            }],
            ..Default::default()
        };

        let bytes = info.encode_to_vec();
        let decoded = AgentInfoProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_agent_info_field_tags() {
        // done = 8, max_step_reached = 9, id = 10
        let bytes = [0x40, 0x01, 0x48, 0x00, 0x50, 0x05];
        let info = AgentInfoProto::decode(&bytes[..]).unwrap();
        assert!(info.done);
        assert!(!info.max_step_reached);
        assert_eq!(info.id, 5);

        let encoded = AgentInfoProto { max_step_reached: true, ..Default::default() }.encode_to_vec();
        assert_eq!(encoded, vec![0x48, 0x01]);
    }

    #[test]
    fn test_command_enum_values() {
        assert_eq!(CommandProto::Step as i32, 0);
        assert_eq!(CommandProto::Reset as i32, 1);
        assert_eq!(CommandProto::try_from(2).unwrap(), CommandProto::Quit);
    }
}
